use crate::{
    barrier::Barrier,
    config,
    instruction::{sopp, Format, Instruction},
    kernel::{self, Kernel},
    mem,
    uop::{EntryRef, LdsAccess, ScalarAccess, Uop, WavefrontRef},
};
use bitvec::BitArr;
use std::sync::Arc;

/// Work-item active mask.
///
/// Bitmask where a 1 at position i means that work-item i of the wavefront
/// exists and takes part in the instruction.
pub type ActiveMask = BitArr!(for config::MAX_WAVEFRONT_SIZE, in u64);

/// Trace-driven wavefront.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wavefront {
    /// Globally unique id
    pub id: usize,
    /// Index of the next instruction of the kernel program
    pub pc: usize,
    pub active_mask: ActiveMask,
    /// Functionally finished: the last instruction was fetched
    pub finished: bool,
    /// Wavefront pool entry while mapped
    pub entry: Option<usize>,
    pub num_fetched: u64,
    pub first_local_id: usize,
    pub first_global_id: usize,
}

impl Wavefront {
    /// Functionally execute the next instruction.
    ///
    /// The returned uop carries the decoded instruction, its behavior flags
    /// and per work-item memory addresses.
    pub fn execute(
        &mut self,
        kernel: &Kernel,
        wavefront: WavefrontRef,
        entry: EntryRef,
        wavefront_size: usize,
    ) -> Uop {
        assert!(!self.finished, "wavefront {} already finished", self.id);
        let trace_inst = kernel
            .program
            .get(self.pc)
            .unwrap_or_else(|| panic!("wavefront {} ran past the end of {}", self.id, kernel.name));
        self.pc += 1;

        let mut instruction = Instruction::new(trace_inst.format, trace_inst.opcode);
        if let Some(ref name) = trace_inst.name {
            instruction = instruction.named(name.clone());
        }
        let mut uop = Uop::new(instruction, wavefront, entry, wavefront_size);
        uop.id_in_wavefront = self.num_fetched;
        uop.wavefront_id = self.id;
        uop.exec_mask = self.active_mask;
        self.num_fetched += 1;

        match trace_inst.format {
            Format::SOPP => match trace_inst.opcode {
                sopp::S_ENDPGM => {
                    uop.wavefront_last_instruction = true;
                    self.finished = true;
                }
                sopp::S_BARRIER => uop.at_barrier = true,
                sopp::S_WAITCNT => uop.memory_wait = true,
                _ => {}
            },
            Format::SMRD => {
                uop.scalar_memory_read = true;
                let (addr, size) = trace_inst
                    .access
                    .as_ref()
                    .map_or((0, 4), |access| (access.base, access.size));
                uop.scalar_access = Some(ScalarAccess {
                    addr,
                    size,
                    issued: false,
                });
            }
            Format::MUBUF | Format::MTBUF => {
                if let Some(ref access) = trace_inst.access {
                    match access.kind {
                        kernel::AccessKind::Read => uop.vector_memory_read = true,
                        kernel::AccessKind::Write => uop.vector_memory_write = true,
                        kernel::AccessKind::Atomic => uop.vector_memory_atomic = true,
                    }
                    uop.vector_memory_global_coherency = access.global_coherency;
                    let first_global_id = self.first_global_id;
                    for (lane, info) in uop.active_work_items() {
                        info.global_mem_access_addr = access
                            .addr((first_global_id + lane) as u64)
                            .expect("access pattern of a validated kernel overflows");
                        info.global_mem_access_size = access.size;
                    }
                }
            }
            Format::DS => {
                if let Some(ref access) = trace_inst.access {
                    let kinds: &[mem::AccessKind] = match access.kind {
                        kernel::AccessKind::Read => {
                            uop.lds_read = true;
                            &[mem::AccessKind::Load]
                        }
                        kernel::AccessKind::Write => {
                            uop.lds_write = true;
                            &[mem::AccessKind::Store]
                        }
                        kernel::AccessKind::Atomic => {
                            uop.lds_read = true;
                            uop.lds_write = true;
                            &[mem::AccessKind::Load, mem::AccessKind::Store]
                        }
                    };
                    let first_local_id = self.first_local_id;
                    for (lane, info) in uop.active_work_items() {
                        let addr = access
                            .addr((first_local_id + lane) as u64)
                            .expect("access pattern of a validated kernel overflows");
                        info.lds_accesses = kinds
                            .iter()
                            .map(|&kind| LdsAccess {
                                kind,
                                addr,
                                size: access.size,
                            })
                            .collect();
                    }
                }
            }
            _ => {}
        }
        uop
    }
}

/// Work-group of an ND-range.
///
/// Owned by its compute unit while mapped.
#[derive(Debug)]
pub struct WorkGroup {
    /// Id within the ND-range
    pub id: usize,
    pub nd_range_id: usize,
    pub kernel: Arc<Kernel>,
    pub address_space: usize,
    pub first_global_id: usize,
    pub num_work_items: usize,
    pub wavefronts: Vec<Wavefront>,
    pub barrier: Barrier,

    /// Slot in the compute unit while mapped
    pub slot: Option<usize>,
    pub pool: Option<usize>,

    /// Wavefronts that completed their last instruction
    pub finished_wavefronts: usize,
    /// Uops fetched but not yet completed
    pub in_flight: usize,
    /// All wavefronts completed their last instruction
    pub finished_timing: bool,
}

impl std::fmt::Display for WorkGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkGroup({}/{})", self.nd_range_id, self.id)
    }
}

impl WorkGroup {
    /// Wavefront completed its last instruction.
    ///
    /// Returns the wavefronts released from the barrier.
    pub fn wavefront_finished(&mut self, wavefront: usize) -> Vec<usize> {
        self.finished_wavefronts += 1;
        assert!(self.finished_wavefronts <= self.wavefronts.len());
        if self.finished_wavefronts == self.wavefronts.len() {
            self.finished_timing = true;
        }
        self.barrier.exit(wavefront)
    }

    #[must_use]
    pub fn can_unmap(&self) -> bool {
        self.finished_timing && self.in_flight == 0
    }
}
