use crate::{address, instruction::Instruction, mem, wavefront::ActiveMask};
use bitvec::array::BitArray;
use smallvec::SmallVec;

/// Pipeline stages with a ready timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Stage {
    Fetch,
    Issue,
    Decode,
    Read,
    Execute,
    Write,
}

/// Handle to a wavefront of a work-group mapped to a compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WavefrontRef {
    /// Work-group slot in the compute unit
    pub work_group: usize,
    /// Index of the wavefront in its work-group
    pub wavefront: usize,
}

/// Handle to a wavefront pool entry of a compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef {
    pub pool: usize,
    pub entry: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LdsAccess {
    pub kind: mem::AccessKind,
    pub addr: address,
    pub size: u32,
}

/// Memory side-channel information of a single work-item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct WorkItemInfo {
    pub global_mem_access_addr: address,
    pub global_mem_access_size: u32,
    /// The access of this work-item was already issued
    pub accessed: bool,
    pub lds_accesses: SmallVec<[LdsAccess; 2]>,
    /// Number of `lds_accesses` already issued
    pub lds_accesses_issued: usize,
}

/// Scalar memory read of a uop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScalarAccess {
    pub addr: address,
    pub size: u32,
    pub issued: bool,
}

/// In-flight instruction.
#[derive(Debug, Clone)]
pub struct Uop {
    /// Globally unique id
    pub id: u64,
    pub id_in_wavefront: u64,
    pub id_in_compute_unit: u64,

    pub compute_unit_id: usize,
    pub wavefront_id: usize,
    pub work_group_id: usize,
    pub wavefront: WavefrontRef,
    pub entry: EntryRef,
    pub address_space: usize,

    pub instruction: Instruction,

    pub fetch_ready: Option<u64>,
    pub issue_ready: Option<u64>,
    pub decode_ready: Option<u64>,
    pub read_ready: Option<u64>,
    pub execute_ready: Option<u64>,
    pub write_ready: Option<u64>,

    pub scalar_memory_read: bool,
    pub vector_memory_read: bool,
    pub vector_memory_write: bool,
    pub vector_memory_atomic: bool,
    pub vector_memory_global_coherency: bool,
    pub lds_read: bool,
    pub lds_write: bool,
    pub memory_wait: bool,
    pub at_barrier: bool,
    pub wavefront_last_instruction: bool,

    pub exec_mask: ActiveMask,
    pub work_item_info: Box<[WorkItemInfo]>,
    pub scalar_access: Option<ScalarAccess>,

    pub global_memory_witness: mem::Witness,
    pub lds_witness: mem::Witness,
    /// Blocks already accessed by this uop
    pub coalesced_blocks: SmallVec<[address; 8]>,
}

impl std::fmt::Display for Uop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[uop={} wf={} cu={}]",
            self.instruction, self.id, self.wavefront_id, self.compute_unit_id
        )
    }
}

impl Uop {
    #[must_use]
    pub fn new(
        instruction: Instruction,
        wavefront: WavefrontRef,
        entry: EntryRef,
        wavefront_size: usize,
    ) -> Self {
        Self {
            id: 0,
            id_in_wavefront: 0,
            id_in_compute_unit: 0,
            compute_unit_id: 0,
            wavefront_id: 0,
            work_group_id: 0,
            wavefront,
            entry,
            address_space: 0,
            instruction,
            fetch_ready: None,
            issue_ready: None,
            decode_ready: None,
            read_ready: None,
            execute_ready: None,
            write_ready: None,
            scalar_memory_read: false,
            vector_memory_read: false,
            vector_memory_write: false,
            vector_memory_atomic: false,
            vector_memory_global_coherency: false,
            lds_read: false,
            lds_write: false,
            memory_wait: false,
            at_barrier: false,
            wavefront_last_instruction: false,
            exec_mask: BitArray::ZERO,
            work_item_info: vec![WorkItemInfo::default(); wavefront_size].into_boxed_slice(),
            scalar_access: None,
            global_memory_witness: mem::Witness::new(),
            lds_witness: mem::Witness::new(),
            coalesced_blocks: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn ready_at(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Fetch => self.fetch_ready,
            Stage::Issue => self.issue_ready,
            Stage::Decode => self.decode_ready,
            Stage::Read => self.read_ready,
            Stage::Execute => self.execute_ready,
            Stage::Write => self.write_ready,
        }
    }

    pub fn set_ready(&mut self, stage: Stage, cycle: u64) {
        let ready = match stage {
            Stage::Fetch => &mut self.fetch_ready,
            Stage::Issue => &mut self.issue_ready,
            Stage::Decode => &mut self.decode_ready,
            Stage::Read => &mut self.read_ready,
            Stage::Execute => &mut self.execute_ready,
            Stage::Write => &mut self.write_ready,
        };
        *ready = Some(cycle);
    }

    /// Whether the uop may leave `stage` in `cycle`.
    #[must_use]
    pub fn is_ready(&self, stage: Stage, cycle: u64) -> bool {
        self.ready_at(stage).is_some_and(|ready| ready <= cycle)
    }

    /// Access kind of a vector memory uop.
    ///
    /// # Panics
    /// If the uop is neither a read, write nor atomic.
    #[must_use]
    pub fn vector_memory_access_kind(&self) -> mem::AccessKind {
        if self.vector_memory_write && !self.vector_memory_global_coherency {
            mem::AccessKind::NCStore
        } else if self.vector_memory_write {
            mem::AccessKind::Store
        } else if self.vector_memory_read {
            mem::AccessKind::Load
        } else if self.vector_memory_atomic {
            mem::AccessKind::Store
        } else {
            panic!("{self}: invalid vector memory access kind");
        }
    }

    /// Active work-items with their side-channel info.
    pub fn active_work_items(&mut self) -> impl Iterator<Item = (usize, &mut WorkItemInfo)> + '_ {
        let mask = self.exec_mask;
        self.work_item_info
            .iter_mut()
            .enumerate()
            .filter(move |(lane, _)| mask[*lane])
    }
}
