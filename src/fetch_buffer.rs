use crate::{
    fifo::Fifo,
    uop::{Stage, Uop},
};

/// Fetched uops of a wavefront pool waiting to be issued.
#[derive(Debug)]
pub struct FetchBuffer {
    pub id: usize,
    buffer: Fifo<Uop>,
}

impl FetchBuffer {
    #[must_use]
    pub fn new(id: usize, size: usize) -> Self {
        Self {
            id,
            buffer: Fifo::bounded(size),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.buffer.full()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uop> + '_ {
        self.buffer.iter()
    }

    pub fn add(&mut self, uop: Uop) {
        self.buffer.enqueue(uop);
    }

    /// Index of the oldest fetched uop accepted by `is_valid`.
    ///
    /// Uops are ordered by wavefront id, ties keep the fetch order.
    pub fn oldest(&self, cycle: u64, is_valid: impl Fn(&Uop) -> bool) -> Option<usize> {
        let mut oldest: Option<(usize, &Uop)> = None;
        for (index, uop) in self.buffer.iter().enumerate() {
            if !uop.is_ready(Stage::Fetch, cycle) || !is_valid(uop) {
                continue;
            }
            match oldest {
                Some((_, current)) if current.wavefront_id <= uop.wavefront_id => {}
                _ => oldest = Some((index, uop)),
            }
        }
        oldest.map(|(index, _)| index)
    }

    pub fn remove(&mut self, index: usize) -> Option<Uop> {
        self.buffer.remove(index)
    }
}
