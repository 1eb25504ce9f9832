use crate::{
    config::{self, RegisterAllocationGranularity},
    core::ComputeUnit,
    mem, mmu, trace,
    wavefront::WorkGroup,
};
use crossbeam::utils::CachePadded;
use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

fn round_up(value: usize, granularity: usize) -> Option<usize> {
    value.div_ceil(granularity).checked_mul(granularity)
}

fn overflow(quantity: &'static str) -> config::Error {
    log::error!("{quantity} overflows");
    config::Error::Overflow { quantity }
}

/// All compute units of the GPU.
///
/// Compute units that can take another work-group are kept in the
/// available list.
#[derive(Debug)]
pub struct Gpu {
    pub config: Arc<config::GPU>,
    pub compute_units: Box<[ComputeUnit]>,
    pub mmu: Arc<Mutex<mmu::Mmu>>,
    pub tracer: trace::Ref,
    available: VecDeque<usize>,
    work_groups_per_wavefront_pool: usize,
}

impl Gpu {
    #[must_use]
    pub fn new(config: Arc<config::GPU>, tracer: trace::Ref) -> Self {
        let memory_config = config.memory.clone();
        Self::with_memory(config, tracer, |id, mmu| {
            mem::Memory::new(id, &memory_config, Arc::clone(mmu))
        })
    }

    /// Create the GPU with custom memory modules per compute unit.
    pub fn with_memory<F>(config: Arc<config::GPU>, tracer: trace::Ref, mut memory: F) -> Self
    where
        F: FnMut(usize, &Arc<Mutex<mmu::Mmu>>) -> mem::Memory,
    {
        let mmu = Arc::new(Mutex::new(mmu::Mmu::new(config.memory.page_size)));
        let uop_ids = Arc::new(CachePadded::new(AtomicU64::new(0)));
        let compute_units = (0..config.num_compute_units)
            .map(|id| {
                ComputeUnit::new(
                    id,
                    Arc::clone(&config),
                    memory(id, &mmu),
                    Arc::clone(&tracer),
                    Arc::clone(&uop_ids),
                )
            })
            .collect();
        let mut gpu = Self {
            work_groups_per_wavefront_pool: config.max_work_groups_per_wavefront_pool,
            config,
            compute_units,
            mmu,
            tracer,
            available: VecDeque::new(),
        };
        for id in 0..gpu.compute_units.len() {
            gpu.insert_in_available_compute_units(id);
        }
        gpu
    }

    /// Compute unit that can take a work-group, if any.
    #[must_use]
    pub fn available_compute_unit(&self) -> Option<usize> {
        self.available.front().copied()
    }

    #[must_use]
    pub fn available_compute_units(&self) -> &VecDeque<usize> {
        &self.available
    }

    pub fn insert_in_available_compute_units(&mut self, id: usize) {
        let cu = &mut self.compute_units[id];
        assert!(
            !cu.in_available_compute_units,
            "{cu} is already in the available list"
        );
        cu.in_available_compute_units = true;
        self.available.push_back(id);
    }

    pub fn remove_from_available_compute_units(&mut self, id: usize) {
        let cu = &mut self.compute_units[id];
        assert!(
            cu.in_available_compute_units,
            "{cu} is not in the available list"
        );
        cu.in_available_compute_units = false;
        self.available.retain(|&available| available != id);
    }

    #[must_use]
    pub fn work_groups_per_wavefront_pool(&self) -> usize {
        self.work_groups_per_wavefront_pool
    }

    #[must_use]
    pub fn work_groups_per_compute_unit(&self) -> usize {
        self.work_groups_per_wavefront_pool * self.config.num_wavefront_pools
    }

    fn has_capacity(&self, id: usize) -> bool {
        self.compute_units[id].num_work_groups() < self.work_groups_per_compute_unit()
    }

    /// Number of work-groups of a kernel that fit into one wavefront pool.
    ///
    /// The limit is the minimum of the wavefront, register and local memory
    /// limits, capped at the configured maximum.
    pub fn calc_work_groups_per_wavefront_pool(
        &self,
        work_items_per_work_group: usize,
        registers_per_work_item: usize,
        local_memory_per_work_group: usize,
    ) -> Result<usize, config::Error> {
        let config = &self.config;
        let wavefront_size = config.wavefront_size;
        let max_work_groups = config.max_work_groups_per_wavefront_pool;
        let wavefronts_per_work_group = config.wavefronts_per_work_group(work_items_per_work_group);

        let wavefront_limit = if wavefronts_per_work_group == 0 {
            max_work_groups
        } else {
            config.max_wavefronts_per_wavefront_pool / wavefronts_per_work_group
        };

        let registers_per_work_group = match config.register_allocation_granularity {
            RegisterAllocationGranularity::Wavefront => registers_per_work_item
                .checked_mul(wavefront_size)
                .and_then(|registers| round_up(registers, config.register_allocation_size))
                .and_then(|registers| registers.checked_mul(wavefronts_per_work_group)),
            RegisterAllocationGranularity::WorkGroup => registers_per_work_item
                .checked_mul(work_items_per_work_group)
                .and_then(|registers| round_up(registers, config.register_allocation_size)),
        }
        .ok_or_else(|| overflow("registers per work-group"))?;
        let register_limit = if registers_per_work_group == 0 {
            max_work_groups
        } else {
            config.num_vector_registers / registers_per_work_group
        };

        let local_memory = round_up(local_memory_per_work_group, config.lds_allocation_size)
            .ok_or_else(|| overflow("local memory per work-group"))?;
        let local_memory_limit = if local_memory == 0 {
            max_work_groups
        } else {
            config.lds_size / local_memory
        };

        let limit = max_work_groups
            .min(wavefront_limit)
            .min(register_limit)
            .min(local_memory_limit);
        log::debug!(
            "work-groups per wavefront pool: {limit} (wavefronts={wavefront_limit} registers={register_limit} lds={local_memory_limit} max={max_work_groups})"
        );
        if limit == 0 {
            log::error!(
                "work-group of {work_items_per_work_group} work-items does not fit into a wavefront pool"
            );
            return Err(config::Error::WorkGroupDoesNotFit {
                work_items_per_work_group,
                registers_per_work_item,
                local_memory_per_work_group,
            });
        }
        Ok(limit)
    }

    /// Change the work-group limit and rebuild the available list.
    pub fn set_work_groups_per_wavefront_pool(&mut self, limit: usize) {
        assert!(limit > 0, "work-group limit must be non-zero");
        if limit == self.work_groups_per_wavefront_pool {
            return;
        }
        log::debug!(
            "work-groups per wavefront pool: {} -> {limit}",
            self.work_groups_per_wavefront_pool
        );
        self.work_groups_per_wavefront_pool = limit;
        for id in self.available.drain(..) {
            self.compute_units[id].in_available_compute_units = false;
        }
        for id in 0..self.compute_units.len() {
            if self.has_capacity(id) {
                self.insert_in_available_compute_units(id);
            }
        }
    }

    pub fn map_work_group(&mut self, id: usize, work_group: WorkGroup) {
        self.compute_units[id].map_work_group(work_group);
        if !self.has_capacity(id) {
            self.remove_from_available_compute_units(id);
        }
    }

    /// Advance every compute unit by one cycle.
    ///
    /// Returns the work-groups that finished in this cycle.
    #[tracing::instrument(name = "gpu_run", skip(self))]
    pub fn run(&mut self, cycle: u64) -> Vec<WorkGroup> {
        let mut finished = Vec::new();
        for id in 0..self.compute_units.len() {
            let cu = &mut self.compute_units[id];
            cu.run(cycle);
            finished.append(&mut cu.state.finished_work_groups);
            if !cu.in_available_compute_units && self.has_capacity(id) {
                self.insert_in_available_compute_units(id);
            }
        }
        if !finished.is_empty() {
            log::debug!(
                "cycle {cycle}: {} work-groups finished, available compute units: [{}]",
                finished.len(),
                self.available_compute_units().iter().join(", ")
            );
        }
        finished
    }

    #[must_use]
    pub fn last_complete_cycle(&self) -> u64 {
        self.compute_units
            .iter()
            .map(|cu| cu.state.last_complete_cycle)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn num_completed_instructions(&self) -> u64 {
        self.compute_units
            .iter()
            .map(|cu| cu.state.num_completed_instructions)
            .sum()
    }

    #[must_use]
    pub fn num_fetched_instructions(&self) -> u64 {
        self.compute_units
            .iter()
            .map(|cu| cu.state.num_fetched_instructions)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::Gpu;
    use crate::{
        config::{self, RegisterAllocationGranularity},
        testing, trace,
    };
    use color_eyre::eyre;
    use std::sync::Arc;

    fn gpu(config: config::GPU) -> Gpu {
        Gpu::new(Arc::new(config), trace::Tracer::disabled().into_ref())
    }

    #[test]
    fn test_wavefront_limit() -> eyre::Result<()> {
        let gpu = gpu(config::GPU::default());
        // 10 wavefronts per pool, 4 wavefronts per work-group
        assert_eq!(gpu.calc_work_groups_per_wavefront_pool(256, 0, 0)?, 2);
        assert_eq!(gpu.calc_work_groups_per_wavefront_pool(64, 0, 0)?, 10);
        Ok(())
    }

    #[test]
    fn test_minimum_across_limits() -> eyre::Result<()> {
        let gpu = gpu(config::GPU::default());
        // 64 * 64 registers per wavefront: 65536 / 4096 = 16
        assert_eq!(gpu.calc_work_groups_per_wavefront_pool(64, 64, 0)?, 10);
        // 2 wavefronts of 64 * 64 registers: 65536 / 8192 = 8, 10 / 2 = 5 wavefronts
        assert_eq!(gpu.calc_work_groups_per_wavefront_pool(128, 64, 0)?, 5);
        // 2 wavefronts of 64 * 128 registers: 65536 / 16384 = 4
        assert_eq!(gpu.calc_work_groups_per_wavefront_pool(128, 128, 0)?, 4);
        // 65536 / 32768 = 2
        assert_eq!(gpu.calc_work_groups_per_wavefront_pool(64, 0, 32768)?, 2);
        // local memory is rounded up to 64 bytes: 65536 / 21888 = 2
        assert_eq!(gpu.calc_work_groups_per_wavefront_pool(64, 0, 21845)?, 2);
        Ok(())
    }

    #[test]
    fn test_register_allocation_granularity() -> eyre::Result<()> {
        let wavefront = gpu(config::GPU {
            register_allocation_size: 256,
            ..config::GPU::default()
        });
        let work_group = gpu(config::GPU {
            register_allocation_size: 256,
            register_allocation_granularity: RegisterAllocationGranularity::WorkGroup,
            ..config::GPU::default()
        });
        // 96 work-items: 2 wavefronts of 64 * 200 = 12800 registers each
        assert_eq!(wavefront.calc_work_groups_per_wavefront_pool(96, 200, 0)?, 2);
        // 96 * 200 = 19200 registers
        assert_eq!(work_group.calc_work_groups_per_wavefront_pool(96, 200, 0)?, 3);
        // 96 * 9 = 864 -> 1024 registers
        assert_eq!(work_group.calc_work_groups_per_wavefront_pool(96, 9, 0)?, 5);
        Ok(())
    }

    #[test]
    fn test_work_group_that_does_not_fit() {
        let gpu = gpu(config::GPU::default());
        assert!(matches!(
            gpu.calc_work_groups_per_wavefront_pool(64, 0, 65537),
            Err(config::Error::WorkGroupDoesNotFit { .. })
        ));
        assert!(gpu.calc_work_groups_per_wavefront_pool(704, 0, 0).is_err());
    }

    #[test]
    fn test_overflowing_resources_are_rejected() {
        let gpu = gpu(config::GPU::default());
        assert!(matches!(
            gpu.calc_work_groups_per_wavefront_pool(64, usize::MAX / 2, 0),
            Err(config::Error::Overflow {
                quantity: "registers per work-group"
            })
        ));
        assert!(matches!(
            gpu.calc_work_groups_per_wavefront_pool(64, 0, usize::MAX),
            Err(config::Error::Overflow {
                quantity: "local memory per work-group"
            })
        ));
    }

    #[test]
    fn test_available_list_follows_occupancy() {
        let mut gpu = gpu((*testing::config()).clone());
        assert_eq!(gpu.available_compute_unit(), Some(0));
        gpu.set_work_groups_per_wavefront_pool(1);
        assert_eq!(gpu.work_groups_per_compute_unit(), 4);

        for id in 0..4 {
            gpu.map_work_group(0, testing::work_group(id, 1));
        }
        assert_eq!(gpu.available_compute_unit(), Some(1));
        assert!(!gpu.compute_units[0].in_available_compute_units);

        // raising the limit makes the full compute unit available again
        gpu.set_work_groups_per_wavefront_pool(2);
        assert_eq!(gpu.available_compute_units().len(), 2);
        assert!(gpu.compute_units[0].in_available_compute_units);
    }

    #[test]
    #[should_panic(expected = "already in the available list")]
    fn test_double_insert_panics() {
        let mut gpu = gpu(config::GPU::default());
        gpu.insert_in_available_compute_units(3);
    }

    #[test]
    #[should_panic(expected = "not in the available list")]
    fn test_remove_absent_panics() {
        let mut gpu = gpu(config::GPU::default());
        gpu.remove_from_available_compute_units(3);
        gpu.remove_from_available_compute_units(3);
    }
}
