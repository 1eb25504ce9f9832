use crate::{
    config,
    fetch_buffer::FetchBuffer,
    func_unit::{BranchUnit, ExecutionUnit, LdsUnit, ScalarUnit, SimdUnit, VectorMemoryUnit},
    mem, trace,
    uop::{EntryRef, Stage, Uop, WavefrontRef},
    wavefront::WorkGroup,
    wavefront_pool::{Entry, WavefrontPool},
};
use console::style;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// State of a compute unit shared by its execution units.
#[derive(Debug)]
pub struct State {
    pub compute_unit_id: usize,
    pub config: Arc<config::GPU>,
    pub pools: Box<[WavefrontPool]>,
    /// Mapped work-groups by slot
    pub work_groups: Box<[Option<WorkGroup>]>,
    pub num_work_groups: usize,
    /// Unmapped work-groups not yet handed back to their ND-range
    pub finished_work_groups: Vec<WorkGroup>,
    pub memory: mem::Memory,
    pub tracer: trace::Ref,
    pub stats: stats::ComputeUnit,
    pub last_complete_cycle: u64,
    pub num_completed_instructions: u64,
    pub num_fetched_instructions: u64,
}

impl State {
    #[must_use]
    pub fn entry(&self, entry: EntryRef) -> &Entry {
        &self.pools[entry.pool].entries[entry.entry]
    }

    pub fn entry_mut(&mut self, entry: EntryRef) -> &mut Entry {
        &mut self.pools[entry.pool].entries[entry.entry]
    }

    #[must_use]
    pub fn work_group(&self, slot: usize) -> Option<&WorkGroup> {
        self.work_groups.get(slot).and_then(Option::as_ref)
    }

    pub fn work_group_mut(&mut self, slot: usize) -> Option<&mut WorkGroup> {
        self.work_groups.get_mut(slot).and_then(Option::as_mut)
    }

    fn mapped_work_group_mut(&mut self, slot: usize) -> &mut WorkGroup {
        let compute_unit_id = self.compute_unit_id;
        self.work_group_mut(slot).unwrap_or_else(|| {
            panic!("compute unit {compute_unit_id} has no work-group in slot {slot}")
        })
    }

    /// Clear the barrier wait of released wavefronts.
    fn release_from_barrier(&mut self, slot: usize, released: &[usize]) {
        if released.is_empty() {
            return;
        }
        let Some(work_group) = self.work_groups[slot].as_ref() else {
            return;
        };
        let pool = work_group.pool.expect("mapped work-group has a pool");
        for &index in released {
            let entry = work_group.wavefronts[index]
                .entry
                .expect("mapped wavefront has a pool entry");
            self.pools[pool].entries[entry].wait_for_barrier = false;
        }
        log::debug!(
            "{}: released {} wavefronts from barrier",
            work_group,
            released.len()
        );
    }

    pub fn arrive_at_barrier(&mut self, wavefront: WavefrontRef) {
        let released = self
            .mapped_work_group_mut(wavefront.work_group)
            .barrier
            .arrive(wavefront.wavefront);
        self.release_from_barrier(wavefront.work_group, &released);
    }

    /// Wavefront completed its last instruction.
    pub fn finish_wavefront(&mut self, wavefront: WavefrontRef) {
        let work_group = self.mapped_work_group_mut(wavefront.work_group);
        let released = work_group.wavefront_finished(wavefront.wavefront);
        log::debug!(
            "{work_group}: wavefront {} finished ({}/{})",
            work_group.wavefronts[wavefront.wavefront].id,
            work_group.finished_wavefronts,
            work_group.wavefronts.len()
        );
        self.release_from_barrier(wavefront.work_group, &released);
    }

    /// The uop left its execution unit.
    pub fn retire(&mut self, uop: &Uop, cycle: u64) {
        self.tracer.lock().end_instruction(uop);
        self.last_complete_cycle = self.last_complete_cycle.max(cycle);
        self.num_completed_instructions += 1;

        let slot = uop.wavefront.work_group;
        let work_group = self.mapped_work_group_mut(slot);
        assert!(work_group.in_flight > 0, "{work_group} has no uop in flight");
        work_group.in_flight -= 1;
        if work_group.can_unmap() {
            self.unmap_work_group(slot);
        }
    }

    pub fn unmap_work_group(&mut self, slot: usize) {
        let Some(mut work_group) = self.work_groups[slot].take() else {
            panic!(
                "compute unit {}: unmapping empty slot {slot}",
                self.compute_unit_id
            );
        };
        let pool = work_group.pool.take().expect("mapped work-group has a pool");
        self.pools[pool].unmap_wavefronts(&mut work_group);
        work_group.slot = None;
        self.num_work_groups -= 1;
        self.stats.completed_work_groups += 1;
        self.tracer.lock().line(format_args!(
            "si.unmap_wg cu={} wg={}",
            self.compute_unit_id, work_group.id
        ));
        log::debug!(
            "compute unit {}: unmapped {work_group} from slot {slot}",
            self.compute_unit_id
        );
        self.finished_work_groups.push(work_group);
    }
}

/// Issue up to `max` uops of the fetch buffer to `unit`, oldest first.
pub fn issue_to_execution_unit(
    fetch_buffer: &mut FetchBuffer,
    unit: &mut dyn ExecutionUnit,
    max: usize,
    cycle: u64,
    state: &mut State,
) -> usize {
    let mut issued = 0;
    while issued < max {
        if !unit.can_issue() {
            break;
        }
        let Some(index) = fetch_buffer.oldest(cycle, |uop| unit.is_valid_uop(uop)) else {
            break;
        };
        let Some(uop) = fetch_buffer.remove(index) else {
            break;
        };
        unit.issue(uop, cycle, state);
        issued += 1;
    }
    issued
}

/// A Southern Islands compute unit.
#[derive(Debug)]
pub struct ComputeUnit {
    pub id: usize,
    pub config: Arc<config::GPU>,
    pub branch_unit: BranchUnit,
    pub scalar_unit: ScalarUnit,
    /// One SIMD unit per wavefront pool
    pub simd_units: Box<[SimdUnit]>,
    pub vector_memory_unit: VectorMemoryUnit,
    pub lds_unit: LdsUnit,
    /// One fetch buffer per wavefront pool
    pub fetch_buffers: Box<[FetchBuffer]>,
    pub state: State,
    pub in_available_compute_units: bool,
    uop_ids: Arc<CachePadded<AtomicU64>>,
    next_id_in_compute_unit: u64,
}

impl std::fmt::Display for ComputeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComputeUnit({})", self.id)
    }
}

impl ComputeUnit {
    #[must_use]
    pub fn new(
        id: usize,
        config: Arc<config::GPU>,
        memory: mem::Memory,
        tracer: trace::Ref,
        uop_ids: Arc<CachePadded<AtomicU64>>,
    ) -> Self {
        let num_pools = config.num_wavefront_pools;
        let pools = (0..num_pools)
            .map(|pool| WavefrontPool::new(pool, config.max_wavefronts_per_wavefront_pool))
            .collect();
        let fetch_buffers = (0..num_pools)
            .map(|pool| FetchBuffer::new(pool, config.fetch_buffer_size))
            .collect();
        let simd_units = (0..num_pools)
            .map(|pool| SimdUnit::new(pool, &config.simd_unit))
            .collect();
        let work_groups = (0..config.max_work_groups_per_compute_unit())
            .map(|_| None)
            .collect();
        let state = State {
            compute_unit_id: id,
            config: Arc::clone(&config),
            pools,
            work_groups,
            num_work_groups: 0,
            finished_work_groups: Vec::new(),
            memory,
            tracer,
            stats: stats::ComputeUnit::new(id),
            last_complete_cycle: 0,
            num_completed_instructions: 0,
            num_fetched_instructions: 0,
        };
        Self {
            id,
            branch_unit: BranchUnit::new(&config.branch_unit),
            scalar_unit: ScalarUnit::new(&config.scalar_unit),
            simd_units,
            vector_memory_unit: VectorMemoryUnit::new(&config.vector_memory_unit),
            lds_unit: LdsUnit::new(&config.lds_unit),
            fetch_buffers,
            state,
            in_available_compute_units: false,
            uop_ids,
            next_id_in_compute_unit: 0,
            config,
        }
    }

    #[must_use]
    pub fn num_work_groups(&self) -> usize {
        self.state.num_work_groups
    }

    /// Number of uops in the fetch buffers and execution units.
    #[must_use]
    pub fn num_in_flight(&self) -> usize {
        self.fetch_buffers.iter().map(FetchBuffer::len).sum::<usize>()
            + self.branch_unit.num_in_flight()
            + self.scalar_unit.num_in_flight()
            + self
                .simd_units
                .iter()
                .map(ExecutionUnit::num_in_flight)
                .sum::<usize>()
            + self.vector_memory_unit.num_in_flight()
            + self.lds_unit.num_in_flight()
    }

    /// Map a work-group onto a free slot and its wavefronts onto a pool.
    ///
    /// Returns the slot of the work-group.
    pub fn map_work_group(&mut self, mut work_group: WorkGroup) -> usize {
        let num_wavefronts = work_group.wavefronts.len();
        let Some(slot) = self.state.work_groups.iter().position(Option::is_none) else {
            panic!("{self}: no free work-group slot for {work_group}");
        };
        let num_pools = self.state.pools.len();
        let preferred = slot % num_pools;
        let pool = if self.state.pools[preferred].num_free_entries() >= num_wavefronts {
            preferred
        } else {
            (0..num_pools)
                .find(|&pool| self.state.pools[pool].num_free_entries() >= num_wavefronts)
                .unwrap_or(preferred)
        };

        work_group.slot = Some(slot);
        work_group.pool = Some(pool);
        self.state.pools[pool].map_wavefronts(&mut work_group);

        self.state.tracer.lock().line(format_args!(
            "si.map_wg cu={} wg={} wi_first={} wi_count={} wf_first={} wf_count={}",
            self.id,
            work_group.id,
            work_group.first_global_id,
            work_group.num_work_items,
            work_group.wavefronts.first().map_or(0, |wf| wf.id),
            num_wavefronts
        ));
        log::debug!(
            "{}",
            style(format!(
                "{self}: mapped {work_group} to slot {slot} (wavefront pool {pool})"
            ))
            .cyan()
        );
        self.state.stats.mapped_work_groups += 1;
        self.state.num_work_groups += 1;
        self.state.work_groups[slot] = Some(work_group);
        slot
    }

    pub fn unmap_work_group(&mut self, slot: usize) {
        self.state.unmap_work_group(slot);
    }

    /// Issue from the fetch buffer of `pool` to all execution units.
    ///
    /// The scalar and branch units are served first.
    pub fn issue(&mut self, pool: usize, cycle: u64) {
        let max = self.config.max_instructions_issued_per_type;
        let fetch_buffer = &mut self.fetch_buffers[pool];
        let state = &mut self.state;
        let units: [&mut dyn ExecutionUnit; 5] = [
            &mut self.branch_unit,
            &mut self.scalar_unit,
            &mut self.simd_units[pool],
            &mut self.vector_memory_unit,
            &mut self.lds_unit,
        ];
        for unit in units {
            let issued = issue_to_execution_unit(fetch_buffer, &mut *unit, max, cycle, state);
            if issued > 0 {
                log::trace!(
                    "compute unit {}: issued {issued} uops from fetch buffer {pool} to {} unit",
                    state.compute_unit_id,
                    unit.kind()
                );
            }
        }
    }

    /// Fill the fetch buffer of `pool` from its wavefront pool.
    pub fn fetch(&mut self, pool: usize, cycle: u64) {
        let wavefront_size = self.config.wavefront_size;
        let fetch_latency = self.config.fetch_latency;
        let fetch_width = self.config.fetch_width;
        let mut fetched = 0;

        for entry_id in 0..self.state.pools[pool].entries.len() {
            let entry = &mut self.state.pools[pool].entries[entry_id];
            let Some(wavefront_ref) = entry.wavefront else {
                continue;
            };
            if entry.ready_next_cycle {
                entry.ready_next_cycle = false;
                entry.ready = true;
                continue;
            }
            if entry.wavefront_finished {
                continue;
            }
            let work_group = self.state.work_groups[wavefront_ref.work_group]
                .as_mut()
                .expect("pool entry refers to a mapped work-group");
            if work_group.wavefronts[wavefront_ref.wavefront].finished {
                continue;
            }
            if entry.mem_wait {
                if !entry.no_outstanding_accesses() {
                    continue;
                }
                log::trace!(
                    "compute unit {}: wavefront {} done waiting for memory",
                    self.id,
                    work_group.wavefronts[wavefront_ref.wavefront].id
                );
                entry.mem_wait = false;
            }
            if entry.wait_for_barrier {
                continue;
            }
            if self.fetch_buffers[pool].full() {
                log::trace!("compute unit {}: fetch buffer {pool} is full", self.id);
                break;
            }
            if !entry.ready || fetched >= fetch_width {
                continue;
            }

            entry.ready = false;
            let entry_ref = EntryRef {
                pool,
                entry: entry_id,
            };
            let kernel = &work_group.kernel;
            let wavefront = &mut work_group.wavefronts[wavefront_ref.wavefront];
            let mut uop = wavefront.execute(kernel, wavefront_ref, entry_ref, wavefront_size);
            uop.id = self.uop_ids.fetch_add(1, Ordering::Relaxed);
            uop.id_in_compute_unit = self.next_id_in_compute_unit;
            uop.compute_unit_id = self.id;
            uop.work_group_id = work_group.id;
            uop.address_space = work_group.address_space;
            uop.set_ready(Stage::Fetch, cycle + fetch_latency);
            work_group.in_flight += 1;
            self.next_id_in_compute_unit += 1;
            self.state.num_fetched_instructions += 1;

            log::trace!("compute unit {}: fetched {uop} into fetch buffer {pool}", self.id);
            self.state.tracer.lock().new_instruction(&uop, pool);
            self.fetch_buffers[pool].add(uop);
            fetched += 1;
        }
    }

    #[tracing::instrument(name = "compute_unit_run", skip(self))]
    pub fn run(&mut self, cycle: u64) {
        if self.state.num_work_groups == 0 {
            return;
        }
        log::debug!(
            "{}",
            style(format!(
                "cycle {cycle:03} compute unit {}: {} work-groups, {} uops in flight",
                self.id,
                self.state.num_work_groups,
                self.num_in_flight()
            ))
            .blue()
        );
        self.state.memory.cycle(cycle);

        for simd_unit in self.simd_units.iter_mut() {
            simd_unit.run(cycle, &mut self.state);
        }
        self.vector_memory_unit.run(cycle, &mut self.state);
        self.lds_unit.run(cycle, &mut self.state);
        self.scalar_unit.run(cycle, &mut self.state);
        self.branch_unit.run(cycle, &mut self.state);

        let num_pools = self.state.pools.len();
        let active_fetch_buffer = (cycle % num_pools as u64) as usize;
        self.issue(active_fetch_buffer, cycle);

        for pool in 0..num_pools {
            self.fetch(pool, cycle);
        }
    }
}
