use super::{
    pipeline::{pass, Gate, Retire, Sweep},
    ExecutionUnit, Kind,
};
use crate::{
    config, core,
    fifo::Fifo,
    uop::{Stage, Uop},
    wavefront_pool::Counter,
};

/// Executes local data share instructions.
#[derive(Debug)]
pub struct LdsUnit {
    config: config::MemoryPipeline,
    issue_buffer: Fifo<Uop>,
    decode_buffer: Fifo<Uop>,
    read_buffer: Fifo<Uop>,
    mem_buffer: Fifo<Uop>,
    write_buffer: Fifo<Uop>,
}

impl LdsUnit {
    #[must_use]
    pub fn new(config: &config::MemoryPipeline) -> Self {
        Self {
            issue_buffer: Fifo::bounded(config.issue_buffer_size),
            decode_buffer: Fifo::bounded(config.decode_buffer_size),
            read_buffer: Fifo::bounded(config.read_buffer_size),
            mem_buffer: Fifo::bounded(config.max_inflight_mem_accesses),
            write_buffer: Fifo::bounded(config.write_buffer_size),
            config: config.clone(),
        }
    }

    fn complete(&mut self, cycle: u64, state: &mut core::State) {
        let mut retire = Retire(|uop: Uop, state: &mut core::State| {
            state.entry_mut(uop.entry).decrement(Counter::Lgkm);
            state.retire(&uop, cycle);
        });
        Sweep::new(cycle, self.config.width, Stage::Write).run(
            &mut self.write_buffer,
            &mut retire,
            state,
            pass,
        );
    }

    fn write(&mut self, cycle: u64, state: &mut core::State) {
        let gate = |uop: &mut Uop, _: &mut core::State| {
            if uop.lds_witness.pending() {
                Gate::Stall
            } else {
                Gate::Pass
            }
        };
        Sweep::new(cycle, self.config.width, Stage::Execute)
            .stamps(Stage::Write, self.config.write_latency)
            .tag("lds-w")
            .run(&mut self.mem_buffer, &mut self.write_buffer, state, gate);
    }

    fn mem(&mut self, cycle: u64, state: &mut core::State) {
        // a work-item stops at its first refused access
        let gate = |uop: &mut Uop, state: &mut core::State| {
            let mut all_accessed = true;
            let witness = uop.lds_witness.clone();
            for (_, info) in uop.active_work_items() {
                if info.accessed {
                    continue;
                }
                let lds = &mut state.memory.lds;
                while let Some(access) = info.lds_accesses.get(info.lds_accesses_issued) {
                    if !lds.can_access(access.addr) {
                        break;
                    }
                    lds.access(access.kind, access.addr, &witness);
                    state.stats.accesses.lds.inc(access.kind.into(), 1);
                    info.lds_accesses_issued += 1;
                }
                if info.lds_accesses_issued == info.lds_accesses.len() {
                    info.accessed = true;
                } else {
                    all_accessed = false;
                }
            }
            if all_accessed {
                Gate::Pass
            } else {
                Gate::Stall
            }
        };
        Sweep::new(cycle, self.config.width, Stage::Read)
            .stamps(Stage::Execute, 0)
            .tag("lds-m")
            .run(&mut self.read_buffer, &mut self.mem_buffer, state, gate);
    }

    fn read(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Decode)
            .stamps(Stage::Read, self.config.read_latency)
            .tag("lds-r")
            .run(&mut self.decode_buffer, &mut self.read_buffer, state, pass);
    }

    fn decode(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Issue)
            .stamps(Stage::Decode, self.config.decode_latency)
            .tag("lds-d")
            .wake_wavefront()
            .run(&mut self.issue_buffer, &mut self.decode_buffer, state, pass);
    }
}

impl ExecutionUnit for LdsUnit {
    fn kind(&self) -> Kind {
        Kind::Lds
    }

    fn issue_buffer(&self) -> &Fifo<Uop> {
        &self.issue_buffer
    }

    fn issue_buffer_mut(&mut self) -> &mut Fifo<Uop> {
        &mut self.issue_buffer
    }

    fn is_valid_uop(&self, uop: &Uop) -> bool {
        uop.instruction.is_lds()
    }

    fn num_in_flight(&self) -> usize {
        self.issue_buffer.len()
            + self.decode_buffer.len()
            + self.read_buffer.len()
            + self.mem_buffer.len()
            + self.write_buffer.len()
    }

    fn count_issued(&self, uop: &Uop, state: &mut core::State) {
        state.stats.instructions.lds += 1;
        state.entry_mut(uop.entry).increment(Counter::Lgkm);
    }

    fn run(&mut self, cycle: u64, state: &mut core::State) {
        self.complete(cycle, state);
        self.write(cycle, state);
        self.mem(cycle, state);
        self.read(cycle, state);
        self.decode(cycle, state);
    }
}

#[cfg(test)]
mod tests {
    use super::LdsUnit;
    use crate::{
        func_unit::ExecutionUnit,
        instruction::Format,
        mem::AccessKind,
        testing,
        uop::LdsAccess,
        wavefront_pool::Counter,
    };

    #[test]
    fn test_completes_once_all_accesses_acknowledged() {
        let config = testing::config();
        let (mut cu, mocks) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut unit = LdsUnit::new(&config.lds_unit);

        let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::DS);
        uop.lds_read = true;
        uop.lds_write = true;
        for lane in 0..4 {
            uop.exec_mask.set(lane, true);
            uop.work_item_info[lane].lds_accesses = [AccessKind::Load, AccessKind::Store]
                .into_iter()
                .map(|kind| LdsAccess {
                    kind,
                    addr: lane as u64 * 4,
                    size: 4,
                })
                .collect();
        }
        let entry = uop.entry;
        unit.issue(uop, 0, &mut cu.state);
        assert_eq!(cu.state.entry(entry).count(Counter::Lgkm), 1);

        for cycle in 1..=10 {
            unit.run(cycle, &mut cu.state);
        }
        assert_eq!(mocks.lds.accesses().len(), 8);
        assert_eq!(unit.num_in_flight(), 1);
        assert_eq!(cu.state.stats.accesses.lds.load, 4);
        assert_eq!(cu.state.stats.accesses.lds.store, 4);

        mocks.lds.acknowledge_all();
        unit.run(11, &mut cu.state);
        unit.run(12, &mut cu.state);
        assert_eq!(unit.num_in_flight(), 0);
        assert_eq!(cu.state.entry(entry).count(Counter::Lgkm), 0);
    }

    #[test]
    fn test_work_item_accesses_are_issued_one_at_a_time() {
        let config = testing::config();
        let (mut cu, mocks) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut unit = LdsUnit::new(&config.lds_unit);

        let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::DS);
        uop.lds_read = true;
        uop.lds_write = true;
        uop.exec_mask.set(0, true);
        uop.work_item_info[0].lds_accesses = [AccessKind::Load, AccessKind::Store]
            .into_iter()
            .map(|kind| LdsAccess {
                kind,
                addr: 0x80,
                size: 4,
            })
            .collect();
        unit.issue(uop, 0, &mut cu.state);

        // the memory stage is reached in cycle 3
        unit.run(1, &mut cu.state);
        unit.run(2, &mut cu.state);
        mocks.lds.set_budget(Some(1));
        unit.run(3, &mut cu.state);
        assert_eq!(mocks.lds.accesses(), vec![(AccessKind::Load, 0x80)]);
        let info = &unit.read_buffer.first().expect("uop waits for memory").work_item_info[0];
        assert_eq!(info.lds_accesses_issued, 1);
        assert!(!info.accessed);

        mocks.lds.set_budget(Some(1));
        unit.run(4, &mut cu.state);
        assert_eq!(
            mocks.lds.accesses(),
            vec![(AccessKind::Load, 0x80), (AccessKind::Store, 0x80)]
        );
        assert!(unit.read_buffer.is_empty());
        assert_eq!(unit.mem_buffer.len(), 1);
        assert_eq!(cu.state.stats.accesses.lds.total(), 2);
    }
}
