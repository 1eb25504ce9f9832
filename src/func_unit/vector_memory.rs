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

/// Executes vector memory instructions (MUBUF and MTBUF).
///
/// Work-item accesses are translated, coalesced by cache block and issued
/// to the vector cache over as many cycles as the cache needs to accept
/// them all.
#[derive(Debug)]
pub struct VectorMemoryUnit {
    config: config::MemoryPipeline,
    issue_buffer: Fifo<Uop>,
    decode_buffer: Fifo<Uop>,
    read_buffer: Fifo<Uop>,
    mem_buffer: Fifo<Uop>,
    write_buffer: Fifo<Uop>,
}

impl VectorMemoryUnit {
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
            state.entry_mut(uop.entry).decrement(Counter::Vm);
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
            if uop.global_memory_witness.pending() {
                Gate::Stall
            } else {
                Gate::Pass
            }
        };
        Sweep::new(cycle, self.config.width, Stage::Execute)
            .stamps(Stage::Write, self.config.write_latency)
            .tag("mem-w")
            .run(&mut self.mem_buffer, &mut self.write_buffer, state, gate);
    }

    fn memory(&mut self, cycle: u64, state: &mut core::State) {
        let gate = |uop: &mut Uop, state: &mut core::State| {
            let kind = uop.vector_memory_access_kind();
            let block_size = state.config.memory.vector_cache.block_size;
            let address_space = uop.address_space;
            let exec_mask = uop.exec_mask;
            let mut all_accessed = true;

            for lane in exec_mask.iter_ones().take(uop.work_item_info.len()) {
                let info = &mut uop.work_item_info[lane];
                if info.accessed {
                    continue;
                }
                let physical_addr = state
                    .memory
                    .translate(address_space, info.global_mem_access_addr);
                let block = physical_addr & !(block_size - 1);
                if uop.coalesced_blocks.contains(&block) {
                    info.accessed = true;
                    state.stats.accesses.coalesced += 1;
                    continue;
                }
                if !state.memory.vector_cache.can_access(physical_addr) {
                    all_accessed = false;
                    continue;
                }
                state
                    .memory
                    .vector_cache
                    .access(kind, physical_addr, &uop.global_memory_witness);
                state.stats.accesses.vector.inc(kind.into(), 1);
                uop.coalesced_blocks.push(block);
                info.accessed = true;
            }
            if all_accessed {
                Gate::Pass
            } else {
                log::trace!("{uop}: not all work-items accessed memory");
                Gate::Stall
            }
        };
        Sweep::new(cycle, self.config.width, Stage::Read)
            .stamps(Stage::Execute, 0)
            .tag("mem-m")
            .run(&mut self.read_buffer, &mut self.mem_buffer, state, gate);
    }

    fn read(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Decode)
            .stamps(Stage::Read, self.config.read_latency)
            .tag("mem-r")
            .run(&mut self.decode_buffer, &mut self.read_buffer, state, pass);
    }

    fn decode(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Issue)
            .stamps(Stage::Decode, self.config.decode_latency)
            .tag("mem-d")
            .wake_wavefront()
            .run(&mut self.issue_buffer, &mut self.decode_buffer, state, pass);
    }
}

impl ExecutionUnit for VectorMemoryUnit {
    fn kind(&self) -> Kind {
        Kind::VectorMemory
    }

    fn issue_buffer(&self) -> &Fifo<Uop> {
        &self.issue_buffer
    }

    fn issue_buffer_mut(&mut self) -> &mut Fifo<Uop> {
        &mut self.issue_buffer
    }

    fn is_valid_uop(&self, uop: &Uop) -> bool {
        uop.instruction.is_vector_memory()
    }

    fn num_in_flight(&self) -> usize {
        self.issue_buffer.len()
            + self.decode_buffer.len()
            + self.read_buffer.len()
            + self.mem_buffer.len()
            + self.write_buffer.len()
    }

    fn count_issued(&self, uop: &Uop, state: &mut core::State) {
        state.stats.instructions.vector_memory += 1;
        state.entry_mut(uop.entry).increment(Counter::Vm);
    }

    fn run(&mut self, cycle: u64, state: &mut core::State) {
        self.complete(cycle, state);
        self.write(cycle, state);
        self.memory(cycle, state);
        self.read(cycle, state);
        self.decode(cycle, state);
    }
}

#[cfg(test)]
mod tests {
    use super::VectorMemoryUnit;
    use crate::{
        func_unit::ExecutionUnit, instruction::Format, testing, uop::Uop, wavefront_pool::Counter,
    };

    fn accessed(uop: Option<&Uop>) -> Vec<bool> {
        let uop = uop.expect("uop in stage");
        uop.work_item_info[..4]
            .iter()
            .map(|info| info.accessed)
            .collect()
    }

    fn load(uop: &mut Uop, addrs: &[u64]) {
        uop.vector_memory_read = true;
        for (lane, addr) in addrs.iter().enumerate() {
            uop.exec_mask.set(lane, true);
            uop.work_item_info[lane].global_mem_access_addr = *addr;
            uop.work_item_info[lane].global_mem_access_size = 4;
        }
    }

    #[test]
    fn test_partial_coalescing_keeps_uop_in_memory_stage() {
        let config = testing::config();
        let (mut cu, mocks) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut unit = VectorMemoryUnit::new(&config.vector_memory_unit);

        let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::MUBUF);
        load(&mut uop, &[0x0, 0x40, 0x80, 0xc0]);
        unit.issue(uop, 0, &mut cu.state);

        // issue(1) decode(1) read(1): the memory stage is reached in cycle 3
        for cycle in 1..=2 {
            unit.run(cycle, &mut cu.state);
        }
        assert_eq!(unit.read_buffer.len(), 1);

        mocks.vector.set_budget(Some(2));
        unit.run(3, &mut cu.state);
        assert_eq!(mocks.vector.accesses().len(), 2);
        assert_eq!(unit.read_buffer.len(), 1);
        assert_eq!(unit.mem_buffer.len(), 0);
        assert_eq!(
            accessed(unit.read_buffer.first()),
            vec![true, true, false, false]
        );

        mocks.vector.set_budget(Some(2));
        unit.run(4, &mut cu.state);
        assert_eq!(mocks.vector.accesses().len(), 4);
        assert_eq!(unit.read_buffer.len(), 0);
        assert_eq!(unit.mem_buffer.len(), 1);
        assert_eq!(accessed(unit.mem_buffer.first()), vec![true; 4]);
        assert_eq!(cu.state.stats.accesses.vector.load, 4);
    }

    #[test]
    fn test_work_items_in_same_block_are_coalesced() {
        let config = testing::config();
        let (mut cu, mocks) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut unit = VectorMemoryUnit::new(&config.vector_memory_unit);

        let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::MTBUF);
        load(&mut uop, &[0x100, 0x104, 0x108, 0x140]);
        let entry = uop.entry;
        unit.issue(uop, 0, &mut cu.state);
        assert_eq!(cu.state.entry(entry).count(Counter::Vm), 1);

        for cycle in 1..=10 {
            unit.run(cycle, &mut cu.state);
        }
        assert_eq!(mocks.vector.accesses().len(), 2);
        assert_eq!(cu.state.stats.accesses.coalesced, 2);
        assert_eq!(unit.num_in_flight(), 1);

        mocks.vector.acknowledge_all();
        unit.run(11, &mut cu.state);
        unit.run(12, &mut cu.state);
        assert_eq!(unit.num_in_flight(), 0);
        assert_eq!(cu.state.entry(entry).count(Counter::Vm), 0);
    }

    #[test]
    #[should_panic(expected = "invalid vector memory access kind")]
    fn test_access_without_kind_panics() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut unit = VectorMemoryUnit::new(&config.vector_memory_unit);
        let uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::MUBUF);
        unit.issue(uop, 0, &mut cu.state);
        for cycle in 1..=3 {
            unit.run(cycle, &mut cu.state);
        }
    }
}
