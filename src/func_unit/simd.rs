use super::{
    pipeline::{pass, Retire, Sweep},
    ExecutionUnit, Kind,
};
use crate::{
    config, core,
    fifo::Fifo,
    uop::{Stage, Uop},
};

/// Vector ALU of one wavefront pool.
///
/// Register read, execution and write back form a single stage.
#[derive(Debug)]
pub struct SimdUnit {
    pub id: usize,
    config: config::Simd,
    issue_buffer: Fifo<Uop>,
    decode_buffer: Fifo<Uop>,
    exec_buffer: Fifo<Uop>,
}

impl SimdUnit {
    #[must_use]
    pub fn new(id: usize, config: &config::Simd) -> Self {
        Self {
            id,
            issue_buffer: Fifo::bounded(config.issue_buffer_size),
            decode_buffer: Fifo::bounded(config.decode_buffer_size),
            exec_buffer: Fifo::bounded(config.read_exec_write_buffer_size),
            config: config.clone(),
        }
    }

    fn complete(&mut self, cycle: u64, state: &mut core::State) {
        let mut retire = Retire(|uop: Uop, state: &mut core::State| state.retire(&uop, cycle));
        Sweep::new(cycle, self.config.width, Stage::Execute).run(
            &mut self.exec_buffer,
            &mut retire,
            state,
            pass,
        );
    }

    fn read_exec_write(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Decode)
            .stamps(Stage::Execute, self.config.read_exec_write_latency)
            .tag("simd-e")
            .run(&mut self.decode_buffer, &mut self.exec_buffer, state, pass);
    }

    fn decode(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Issue)
            .stamps(Stage::Decode, self.config.decode_latency)
            .tag("simd-d")
            .wake_wavefront()
            .run(&mut self.issue_buffer, &mut self.decode_buffer, state, pass);
    }
}

impl ExecutionUnit for SimdUnit {
    fn kind(&self) -> Kind {
        Kind::Simd
    }

    fn issue_buffer(&self) -> &Fifo<Uop> {
        &self.issue_buffer
    }

    fn issue_buffer_mut(&mut self) -> &mut Fifo<Uop> {
        &mut self.issue_buffer
    }

    fn is_valid_uop(&self, uop: &Uop) -> bool {
        uop.instruction.is_simd()
    }

    fn num_in_flight(&self) -> usize {
        self.issue_buffer.len() + self.decode_buffer.len() + self.exec_buffer.len()
    }

    fn count_issued(&self, _uop: &Uop, state: &mut core::State) {
        state.stats.instructions.simd += 1;
    }

    fn run(&mut self, cycle: u64, state: &mut core::State) {
        self.complete(cycle, state);
        self.read_exec_write(cycle, state);
        self.decode(cycle, state);
    }
}

#[cfg(test)]
mod tests {
    use super::SimdUnit;
    use crate::{func_unit::ExecutionUnit, instruction::Format, testing};

    #[test]
    fn test_read_exec_write_latency() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut unit = SimdUnit::new(0, &config.simd_unit);
        let uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::VOP3a);
        let entry = uop.entry;
        cu.state.entry_mut(entry).ready = false;
        unit.issue(uop, 0, &mut cu.state);

        // decode sets the wavefront ready for the next cycle
        unit.run(1, &mut cu.state);
        assert!(cu.state.entry(entry).ready_next_cycle);

        for cycle in 2..10 {
            unit.run(cycle, &mut cu.state);
            assert_eq!(unit.num_in_flight(), 1, "cycle {cycle}");
        }
        unit.run(10, &mut cu.state);
        assert_eq!(unit.num_in_flight(), 0);
        assert_eq!(cu.state.last_complete_cycle, 10);
    }
}
