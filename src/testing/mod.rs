use crate::{
    address, config,
    core::{ComputeUnit, State},
    instruction::{Format, Instruction},
    kernel::{Kernel, NdRange, TraceInstruction},
    mem, mmu, trace,
    uop::{EntryRef, Uop, WavefrontRef},
    wavefront::WorkGroup,
};
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

static LOGGER: std::sync::Once = std::sync::Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        env_logger::builder().is_test(true).init();
    });
}

/// Small GPU with default pipelines.
#[must_use]
pub fn config() -> Arc<config::GPU> {
    Arc::new(config::GPU {
        num_compute_units: 2,
        wavefront_size: 64,
        ..config::GPU::default()
    })
}

/// Kernel with a single `s_endpgm` and one work-group of `num_wavefronts`.
#[must_use]
pub fn kernel(num_wavefronts: usize) -> Kernel {
    let local_size = num_wavefronts * config().wavefront_size;
    Kernel {
        name: "empty".to_string(),
        global_size: local_size,
        local_size,
        registers_per_work_item: 0,
        local_memory_per_work_group: 0,
        program: vec![TraceInstruction::end_program()],
    }
}

/// Unmapped work-group with full wavefronts.
#[must_use]
pub fn work_group(id: usize, num_wavefronts: usize) -> WorkGroup {
    let config = config();
    let mut nd_range = NdRange::new(
        0,
        Arc::new(kernel(num_wavefronts)),
        0,
        id * num_wavefronts,
        1,
        &config,
    );
    let mut work_group = nd_range
        .next_work_group()
        .expect("kernel has one work-group");
    work_group.id = id;
    work_group
}

/// Uop that is not bound to any mapped wavefront.
#[must_use]
pub fn uop(format: Format) -> Uop {
    Uop::new(
        Instruction::new(format, 0),
        WavefrontRef {
            work_group: 0,
            wavefront: 0,
        },
        EntryRef { pool: 0, entry: 0 },
        config().wavefront_size,
    )
}

/// Uop of a wavefront of the work-group mapped to `slot`.
///
/// The uop counts as fetched and in flight.
pub fn mapped_uop(state: &mut State, slot: usize, wavefront: usize, format: Format) -> Uop {
    let id = state.num_fetched_instructions;
    let compute_unit_id = state.compute_unit_id;
    let wavefront_size = state.config.wavefront_size;
    let work_group = state
        .work_group_mut(slot)
        .expect("work-group is mapped to slot");
    let pool = work_group.pool.expect("work-group is mapped to a pool");
    let entry = work_group.wavefronts[wavefront]
        .entry
        .expect("wavefront is mapped to an entry");

    let mut uop = Uop::new(
        Instruction::new(format, 0),
        WavefrontRef {
            work_group: slot,
            wavefront,
        },
        EntryRef { pool, entry },
        wavefront_size,
    );
    uop.id = id;
    uop.id_in_compute_unit = id;
    uop.compute_unit_id = compute_unit_id;
    uop.wavefront_id = work_group.wavefronts[wavefront].id;
    uop.work_group_id = work_group.id;
    uop.address_space = work_group.address_space;
    work_group.in_flight += 1;
    state.num_fetched_instructions += 1;
    uop
}

#[derive(Debug, Default)]
struct MockState {
    budget: Option<usize>,
    latency: Option<u64>,
    cycle: u64,
    accesses: Vec<(mem::AccessKind, address)>,
    pending: Vec<(u64, mem::Witness)>,
}

/// Scriptable memory module.
///
/// Without a latency, accesses stay pending until acknowledged explicitly.
#[derive(Debug, Clone, Default)]
pub struct MockMemory(Arc<Mutex<MockState>>);

impl MockMemory {
    /// Limit the number of further accesses accepted.
    pub fn set_budget(&self, budget: Option<usize>) {
        self.0.lock().budget = budget;
    }

    /// Acknowledge accesses `latency` cycles after they were issued.
    pub fn set_latency(&self, latency: Option<u64>) {
        self.0.lock().latency = latency;
    }

    #[must_use]
    pub fn accesses(&self) -> Vec<(mem::AccessKind, address)> {
        self.0.lock().accesses.clone()
    }

    pub fn acknowledge_all(&self) {
        for (_, witness) in self.0.lock().pending.drain(..) {
            witness.acknowledge();
        }
    }
}

impl mem::Module for MockMemory {
    fn can_access(&self, _addr: address) -> bool {
        self.0.lock().budget.map_or(true, |budget| budget > 0)
    }

    fn access(&mut self, kind: mem::AccessKind, addr: address, witness: &mem::Witness) {
        let mut state = self.0.lock();
        if let Some(ref mut budget) = state.budget {
            assert!(*budget > 0, "mock memory: access without budget");
            *budget -= 1;
        }
        witness.expect();
        let ready_at = state.cycle + state.latency.unwrap_or(0);
        state.accesses.push((kind, addr));
        state.pending.push((ready_at, witness.clone()));
    }

    fn cycle(&mut self, cycle: u64) {
        let mut state = self.0.lock();
        state.cycle = cycle;
        if state.latency.is_none() {
            return;
        }
        state.pending.retain(|(ready_at, witness)| {
            if *ready_at <= cycle {
                witness.acknowledge();
                false
            } else {
                true
            }
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mocks {
    pub scalar: MockMemory,
    pub vector: MockMemory,
    pub lds: MockMemory,
}

impl Mocks {
    #[must_use]
    pub fn memory(&self, mmu: Arc<Mutex<mmu::Mmu>>) -> mem::Memory {
        mem::Memory {
            scalar_cache: Box::new(self.scalar.clone()),
            vector_cache: Box::new(self.vector.clone()),
            lds: Box::new(self.lds.clone()),
            mmu,
        }
    }
}

/// Compute unit backed by mock memory modules and a single address space.
#[must_use]
pub fn compute_unit(config: Arc<config::GPU>) -> (ComputeUnit, Mocks) {
    let mut mmu = mmu::Mmu::new(config.memory.page_size);
    let _ = mmu.new_address_space();
    let mocks = Mocks::default();
    let memory = mocks.memory(Arc::new(Mutex::new(mmu)));
    let cu = ComputeUnit::new(
        0,
        config,
        memory,
        trace::Tracer::disabled().into_ref(),
        Arc::new(CachePadded::new(AtomicU64::new(0))),
    );
    (cu, mocks)
}
