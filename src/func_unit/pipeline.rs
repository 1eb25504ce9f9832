use crate::{
    core,
    fifo::Fifo,
    uop::{Stage, Uop},
};

/// Stage-specific admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    Pass,
    Stall,
}

/// Receiver of the uops leaving a stage.
pub trait Sink {
    fn full(&self) -> bool;

    fn accept(&mut self, uop: Uop, state: &mut core::State);
}

impl Sink for Fifo<Uop> {
    fn full(&self) -> bool {
        Fifo::full(self)
    }

    fn accept(&mut self, uop: Uop, _state: &mut core::State) {
        self.enqueue(uop);
    }
}

/// Sink of the complete stage: the uop leaves the unit.
pub struct Retire<F>(pub F);

impl<F> Sink for Retire<F>
where
    F: FnMut(Uop, &mut core::State),
{
    fn full(&self) -> bool {
        false
    }

    fn accept(&mut self, uop: Uop, state: &mut core::State) {
        (self.0)(uop, state);
    }
}

/// Gate that admits every uop.
pub fn pass(_uop: &mut Uop, _state: &mut core::State) -> Gate {
    Gate::Pass
}

/// One stage transition of a unit for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    pub cycle: u64,
    /// Maximum number of uops moved
    pub width: usize,
    /// Timestamp a uop must have reached to leave the input queue
    pub waits_on: Stage,
    /// Timestamp set on entry to the next stage, with the stage latency
    pub stamps: Option<(Stage, u64)>,
    /// Trace tag of the next stage
    pub tag: Option<&'static str>,
    /// Let the wavefront fetch again in the next cycle
    pub wake_wavefront: bool,
}

impl Sweep {
    #[must_use]
    pub fn new(cycle: u64, width: usize, waits_on: Stage) -> Self {
        Self {
            cycle,
            width,
            waits_on,
            stamps: None,
            tag: None,
            wake_wavefront: false,
        }
    }

    #[must_use]
    pub fn stamps(mut self, stage: Stage, latency: u64) -> Self {
        self.stamps = Some((stage, latency));
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    #[must_use]
    pub fn wake_wavefront(mut self) -> Self {
        self.wake_wavefront = true;
        self
    }

    /// Move uops from the head of `from` into `to`.
    ///
    /// The sweep stops at the first uop that is not ready, once `width`
    /// uops moved, when `to` is full or when `gate` stalls the head uop.
    /// Returns the number of uops moved.
    pub fn run<S, G>(
        &self,
        from: &mut Fifo<Uop>,
        to: &mut S,
        state: &mut core::State,
        mut gate: G,
    ) -> usize
    where
        S: Sink,
        G: FnMut(&mut Uop, &mut core::State) -> Gate,
    {
        let mut moved = 0;
        while let Some(uop) = from.first_mut() {
            if !uop.is_ready(self.waits_on, self.cycle) {
                state.tracer.lock().stall(uop);
                break;
            }
            if moved >= self.width {
                break;
            }
            if to.full() {
                state.tracer.lock().stall(uop);
                break;
            }
            if gate(uop, state) == Gate::Stall {
                state.tracer.lock().stall(uop);
                break;
            }
            let Some(mut uop) = from.dequeue() else {
                break;
            };
            if let Some((stage, latency)) = self.stamps {
                uop.set_ready(stage, self.cycle + latency);
            }
            if self.wake_wavefront {
                state.entry_mut(uop.entry).ready_next_cycle = true;
            }
            if let Some(tag) = self.tag {
                state.tracer.lock().stage(&uop, tag);
            }
            to.accept(uop, state);
            moved += 1;
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::{pass, Gate, Retire, Sweep};
    use crate::{fifo::Fifo, instruction::Format, testing, uop::Stage};

    #[test]
    fn test_sweep_preserves_order_and_stops_at_head() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config);
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut from = Fifo::bounded(4);
        let mut to = Fifo::bounded(4);
        for ready in [1, 5, 1] {
            let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::VOP2);
            uop.issue_ready = Some(ready);
            from.enqueue(uop);
        }
        let sweep = Sweep::new(2, 4, Stage::Issue).stamps(Stage::Decode, 3).tag("simd-d");

        // the second uop is not ready, the third must not overtake it
        assert_eq!(sweep.run(&mut from, &mut to, &mut cu.state, pass), 1);
        assert_eq!(from.len(), 2);
        assert_eq!(to.first().and_then(|uop| uop.decode_ready), Some(5));

        let sweep = Sweep { cycle: 5, ..sweep };
        assert_eq!(sweep.run(&mut from, &mut to, &mut cu.state, pass), 2);
        let ids: Vec<_> = to.iter().map(|uop| uop.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_sweep_respects_width_capacity_and_gate() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config);
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut from = Fifo::bounded(4);
        for _ in 0..4 {
            let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::SOP1);
            uop.decode_ready = Some(0);
            from.enqueue(uop);
        }
        let mut to = Fifo::bounded(3);
        let sweep = Sweep::new(1, 2, Stage::Decode).stamps(Stage::Read, 1);
        assert_eq!(sweep.run(&mut from, &mut to, &mut cu.state, pass), 2);
        assert_eq!(sweep.run(&mut from, &mut to, &mut cu.state, pass), 1);
        assert!(to.full());
        assert_eq!(sweep.run(&mut from, &mut to, &mut cu.state, pass), 0);

        let _ = to.dequeue();
        let stalled = sweep.run(&mut from, &mut to, &mut cu.state, |_, _| Gate::Stall);
        assert_eq!(stalled, 0);
        assert_eq!(from.len(), 1);

        let mut retired = Vec::new();
        let mut sink = Retire(|uop: crate::uop::Uop, _: &mut crate::core::State| {
            retired.push(uop.id);
        });
        let sweep = Sweep::new(1, 4, Stage::Decode);
        assert_eq!(sweep.run(&mut from, &mut sink, &mut cu.state, pass), 1);
        assert_eq!(retired.len(), 1);
    }

    #[test]
    fn test_wake_wavefront() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config);
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::DS);
        uop.issue_ready = Some(0);
        let entry = uop.entry;
        let mut from = Fifo::bounded(1);
        from.enqueue(uop);
        let mut to = Fifo::bounded(1);
        let sweep = Sweep::new(1, 1, Stage::Issue)
            .stamps(Stage::Decode, 1)
            .wake_wavefront();
        assert_eq!(sweep.run(&mut from, &mut to, &mut cu.state, pass), 1);
        assert!(cu.state.entry(entry).ready_next_cycle);
    }
}
