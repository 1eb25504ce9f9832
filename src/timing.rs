use crate::{
    config,
    gpu::Gpu,
    kernel::{Kernel, NdRange},
    trace,
};
use console::style;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why the simulation stopped before all ND-ranges completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum FinishReason {
    MaxCycles,
    MaxInstructions,
    /// No instruction completed for more than the stall threshold
    Stall,
}

/// Timing simulation context.
///
/// Owns the GPU and all launched ND-ranges.
#[derive(Debug)]
pub struct Timing {
    pub config: Arc<config::GPU>,
    pub gpu: Gpu,
    /// Active ND-ranges by id
    pub nd_ranges: IndexMap<usize, NdRange>,
    cycle: u64,
    finish: Option<FinishReason>,
    next_nd_range_id: usize,
    next_wavefront_id: usize,
    num_completed_nd_ranges: u64,
}

impl Timing {
    pub fn new(config: Arc<config::GPU>, tracer: trace::Ref) -> Result<Self, config::Error> {
        config.validate()?;
        let gpu = Gpu::new(Arc::clone(&config), tracer);
        Ok(Self::with_gpu(gpu))
    }

    #[must_use]
    pub fn with_gpu(gpu: Gpu) -> Self {
        Self {
            config: Arc::clone(&gpu.config),
            gpu,
            nd_ranges: IndexMap::new(),
            cycle: 0,
            finish: None,
            next_nd_range_id: 0,
            next_wavefront_id: 0,
            num_completed_nd_ranges: 0,
        }
    }

    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    /// Launch a kernel as a new ND-range.
    ///
    /// Fails if a work-group of the kernel does not fit into a wavefront pool.
    pub fn launch(&mut self, kernel: Arc<Kernel>) -> Result<usize, config::Error> {
        kernel.validate()?;
        let limit = self.gpu.calc_work_groups_per_wavefront_pool(
            kernel.local_size,
            kernel.registers_per_work_item,
            kernel.local_memory_per_work_group,
        )?;
        let address_space = self.gpu.mmu.lock().new_address_space();
        let id = self.next_nd_range_id;
        self.next_nd_range_id += 1;

        let nd_range = NdRange::new(
            id,
            kernel,
            address_space,
            self.next_wavefront_id,
            limit,
            &self.config,
        );
        self.next_wavefront_id += nd_range.num_wavefronts();
        log::info!(
            "launched {nd_range} with {} work-groups per wavefront pool",
            limit
        );
        self.nd_ranges.insert(id, nd_range);
        self.update_work_group_limit();
        Ok(id)
    }

    /// The GPU limit is the minimum over all active ND-ranges.
    fn update_work_group_limit(&mut self) {
        let limit = self
            .nd_ranges
            .values()
            .map(|nd_range| nd_range.work_groups_per_wavefront_pool)
            .min()
            .unwrap_or(self.config.max_work_groups_per_wavefront_pool);
        self.gpu.set_work_groups_per_wavefront_pool(limit);
    }

    fn map_work_groups(&mut self) {
        for nd_range in self.nd_ranges.values_mut() {
            while nd_range.has_waiting_work_groups() {
                let Some(cu) = self.gpu.available_compute_unit() else {
                    return;
                };
                let Some(work_group) = nd_range.next_work_group() else {
                    break;
                };
                self.gpu.map_work_group(cu, work_group);
            }
        }
    }

    fn check_finish(&self) -> Option<FinishReason> {
        if self
            .config
            .max_cycles
            .is_some_and(|max_cycles| self.cycle >= max_cycles)
        {
            return Some(FinishReason::MaxCycles);
        }
        if self
            .config
            .max_instructions
            .is_some_and(|max| self.gpu.num_fetched_instructions() >= max)
        {
            return Some(FinishReason::MaxInstructions);
        }
        let idle = self.cycle.saturating_sub(self.gpu.last_complete_cycle());
        if idle > self.config.stall_threshold {
            log::warn!(
                "no instruction completed since cycle {} ({idle} cycles)",
                self.gpu.last_complete_cycle()
            );
            return Some(FinishReason::Stall);
        }
        None
    }

    /// Simulate one cycle.
    ///
    /// Returns false when no ND-range is active.
    /// Once a finish condition holds, the cycle no longer advances.
    #[tracing::instrument(name = "timing_run", skip(self))]
    pub fn run(&mut self) -> bool {
        if self.nd_ranges.is_empty() {
            return false;
        }
        self.map_work_groups();

        if self.finish.is_none() {
            self.finish = self.check_finish();
        }
        if let Some(reason) = self.finish {
            log::debug!("cycle {}: finished ({reason})", self.cycle);
            return true;
        }

        self.cycle += 1;
        log::debug!(
            "{}",
            style(format!("======== cycle {} ========", self.cycle)).bold()
        );
        self.gpu.tracer.lock().cycle(self.cycle);

        for work_group in self.gpu.run(self.cycle) {
            let Some(nd_range) = self.nd_ranges.get_mut(&work_group.nd_range_id) else {
                panic!("{work_group} belongs to unknown ND-range");
            };
            nd_range.complete(work_group);
        }

        let before = self.nd_ranges.len();
        self.nd_ranges.retain(|_, nd_range| {
            if nd_range.is_finished() {
                log::info!("{nd_range} finished");
            }
            !nd_range.is_finished()
        });
        let completed = before - self.nd_ranges.len();
        if completed > 0 {
            self.num_completed_nd_ranges += completed as u64;
            self.update_work_group_limit();
        }
        true
    }

    /// Run until all ND-ranges completed or a finish condition holds.
    pub fn run_to_completion(&mut self) -> Option<FinishReason> {
        while self.run() {
            if self.finish.is_some() {
                break;
            }
        }
        if let Err(err) = self.gpu.tracer.lock().flush() {
            log::error!("failed to flush trace: {err}");
        }
        self.finish
    }

    #[must_use]
    pub fn stats(&self) -> stats::Stats {
        let compute_units: Vec<_> = self
            .gpu
            .compute_units
            .iter()
            .map(|cu| cu.state.stats.clone())
            .collect();
        let sim = stats::Sim {
            cycles: self.cycle,
            fetched_instructions: self.gpu.num_fetched_instructions(),
            completed_instructions: self.gpu.num_completed_instructions(),
            mapped_work_groups: compute_units.iter().map(|cu| cu.mapped_work_groups).sum(),
            completed_work_groups: compute_units
                .iter()
                .map(|cu| cu.completed_work_groups)
                .sum(),
            completed_nd_ranges: self.num_completed_nd_ranges,
        };
        stats::Stats::new(sim, compute_units)
    }
}
