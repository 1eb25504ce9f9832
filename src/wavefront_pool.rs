use crate::{uop::WavefrontRef, wavefront::WorkGroup};

/// Outstanding access counters of a wavefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Counter {
    /// Vector memory
    Vm,
    /// Exports
    Exp,
    /// LDS, GDS, constant and message
    Lgkm,
}

/// Slot of a wavefront in a wavefront pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub id_in_pool: usize,
    pub wavefront: Option<WavefrontRef>,

    vm_cnt: usize,
    exp_cnt: usize,
    lgkm_cnt: usize,

    pub ready: bool,
    pub ready_next_cycle: bool,
    pub wait_for_barrier: bool,
    pub wavefront_finished: bool,
    pub mem_wait: bool,
}

impl Entry {
    #[must_use]
    pub fn valid(&self) -> bool {
        self.wavefront.is_some()
    }

    #[must_use]
    pub fn count(&self, counter: Counter) -> usize {
        match counter {
            Counter::Vm => self.vm_cnt,
            Counter::Exp => self.exp_cnt,
            Counter::Lgkm => self.lgkm_cnt,
        }
    }

    fn counter_mut(&mut self, counter: Counter) -> &mut usize {
        match counter {
            Counter::Vm => &mut self.vm_cnt,
            Counter::Exp => &mut self.exp_cnt,
            Counter::Lgkm => &mut self.lgkm_cnt,
        }
    }

    pub fn increment(&mut self, counter: Counter) {
        *self.counter_mut(counter) += 1;
    }

    pub fn decrement(&mut self, counter: Counter) {
        let id = self.id_in_pool;
        let count = self.counter_mut(counter);
        assert!(*count > 0, "{counter} counter of entry {id} would become negative");
        *count -= 1;
    }

    /// No memory access of the wavefront is outstanding.
    #[must_use]
    pub fn no_outstanding_accesses(&self) -> bool {
        self.vm_cnt == 0 && self.exp_cnt == 0 && self.lgkm_cnt == 0
    }

    /// Reset the entry once its wavefront is unmapped.
    pub fn clear(&mut self) {
        assert!(
            self.no_outstanding_accesses(),
            "clearing entry {} with outstanding accesses (vm={} exp={} lgkm={})",
            self.id_in_pool,
            self.vm_cnt,
            self.exp_cnt,
            self.lgkm_cnt
        );
        *self = Self {
            id_in_pool: self.id_in_pool,
            ..Self::default()
        };
    }
}

/// Wavefronts resident on one SIMD of a compute unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavefrontPool {
    pub id: usize,
    pub entries: Box<[Entry]>,
    num_wavefronts: usize,
}

impl WavefrontPool {
    #[must_use]
    pub fn new(id: usize, max_wavefronts: usize) -> Self {
        let entries = (0..max_wavefronts)
            .map(|id_in_pool| Entry {
                id_in_pool,
                ..Entry::default()
            })
            .collect();
        Self {
            id,
            entries,
            num_wavefronts: 0,
        }
    }

    #[must_use]
    pub fn num_wavefronts(&self) -> usize {
        self.num_wavefronts
    }

    #[must_use]
    pub fn num_free_entries(&self) -> usize {
        self.entries.len() - self.num_wavefronts
    }

    /// Assign a pool entry to every wavefront of the work-group.
    pub fn map_wavefronts(&mut self, work_group: &mut WorkGroup) {
        let slot = work_group.slot.expect("work-group is mapped to a slot");
        assert!(
            self.num_free_entries() >= work_group.wavefronts.len(),
            "wavefront pool {} has {} free entries but {work_group} needs {}",
            self.id,
            self.num_free_entries(),
            work_group.wavefronts.len()
        );
        let mut free = self
            .entries
            .iter_mut()
            .filter(|entry| !entry.valid());
        for (index, wavefront) in work_group.wavefronts.iter_mut().enumerate() {
            let Some(entry) = free.next() else {
                unreachable!("free entries were counted");
            };
            entry.wavefront = Some(WavefrontRef {
                work_group: slot,
                wavefront: index,
            });
            entry.ready = true;
            wavefront.entry = Some(entry.id_in_pool);
        }
        self.num_wavefronts += work_group.wavefronts.len();
        log::debug!(
            "wavefront pool {}: mapped {} wavefronts of {work_group} ({}/{} entries used)",
            self.id,
            work_group.wavefronts.len(),
            self.num_wavefronts,
            self.entries.len()
        );
    }

    /// Release the entries of every wavefront of the work-group.
    pub fn unmap_wavefronts(&mut self, work_group: &mut WorkGroup) {
        for wavefront in &mut work_group.wavefronts {
            let entry_id = wavefront.entry.take().expect("wavefront has a pool entry");
            let entry = &mut self.entries[entry_id];
            assert!(entry.valid());
            entry.clear();
        }
        self.num_wavefronts -= work_group.wavefronts.len();
    }
}
