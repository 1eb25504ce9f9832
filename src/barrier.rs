use bitvec::vec::BitVec;

/// Work-group barrier.
///
/// A barrier is released once every wavefront of the work-group that has
/// not yet finished is waiting at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barrier {
    waiting: BitVec,
    finished: BitVec,
}

impl Barrier {
    #[must_use]
    pub fn new(num_wavefronts: usize) -> Self {
        Self {
            waiting: BitVec::repeat(false, num_wavefronts),
            finished: BitVec::repeat(false, num_wavefronts),
        }
    }

    /// Wavefront arrived at the barrier.
    ///
    /// Returns the wavefronts released by this arrival.
    pub fn arrive(&mut self, wavefront: usize) -> Vec<usize> {
        assert!(
            !self.waiting[wavefront],
            "wavefront {wavefront} arrived at barrier twice"
        );
        assert!(
            !self.finished[wavefront],
            "finished wavefront {wavefront} arrived at barrier"
        );
        self.waiting.set(wavefront, true);
        self.try_release()
    }

    /// Wavefront finished and can unblock the barrier.
    pub fn exit(&mut self, wavefront: usize) -> Vec<usize> {
        assert!(
            !self.waiting[wavefront],
            "wavefront {wavefront} finished while waiting at barrier"
        );
        self.finished.set(wavefront, true);
        self.try_release()
    }

    fn try_release(&mut self) -> Vec<usize> {
        if self.waiting.not_any() {
            return Vec::new();
        }
        let all_arrived = self
            .finished
            .iter()
            .zip(self.waiting.iter())
            .all(|(finished, waiting)| *finished || *waiting);
        if !all_arrived {
            return Vec::new();
        }
        let released: Vec<usize> = self.waiting.iter_ones().collect();
        self.waiting.fill(false);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::Barrier;

    #[test]
    fn test_release_when_all_arrived() {
        let mut barrier = Barrier::new(3);
        assert!(barrier.arrive(0).is_empty());
        assert!(barrier.arrive(2).is_empty());
        assert_eq!(barrier.arrive(1), vec![0, 1, 2]);
        // released wavefronts can arrive again
        assert!(barrier.arrive(0).is_empty());
    }

    #[test]
    fn test_finished_wavefront_releases_barrier() {
        let mut barrier = Barrier::new(3);
        assert!(barrier.arrive(0).is_empty());
        assert!(barrier.exit(1).is_empty());
        assert_eq!(barrier.arrive(2), vec![0, 2]);
        assert!(barrier.arrive(0).is_empty());

        let mut barrier = Barrier::new(2);
        assert!(barrier.arrive(1).is_empty());
        assert_eq!(barrier.exit(0), vec![1]);
    }

    #[test]
    #[should_panic(expected = "arrived at barrier twice")]
    fn test_double_arrival_panics() {
        let mut barrier = Barrier::new(2);
        barrier.arrive(0);
        barrier.arrive(0);
    }
}
