use super::{
    pipeline::{pass, Retire, Sweep},
    ExecutionUnit, Kind,
};
use crate::{
    config, core,
    fifo::Fifo,
    uop::{Stage, Uop},
};

/// Executes branch instructions (SOPP opcodes 2 to 9).
#[derive(Debug)]
pub struct BranchUnit {
    config: config::Pipeline,
    issue_buffer: Fifo<Uop>,
    decode_buffer: Fifo<Uop>,
    read_buffer: Fifo<Uop>,
    exec_buffer: Fifo<Uop>,
    write_buffer: Fifo<Uop>,
}

impl BranchUnit {
    #[must_use]
    pub fn new(config: &config::Pipeline) -> Self {
        Self {
            issue_buffer: Fifo::bounded(config.issue_buffer_size),
            decode_buffer: Fifo::bounded(config.decode_buffer_size),
            read_buffer: Fifo::bounded(config.read_buffer_size),
            exec_buffer: Fifo::bounded(config.exec_buffer_size),
            write_buffer: Fifo::bounded(config.write_buffer_size),
            config: config.clone(),
        }
    }

    fn complete(&mut self, cycle: u64, state: &mut core::State) {
        let mut retire = Retire(|uop: Uop, state: &mut core::State| {
            state.entry_mut(uop.entry).ready = true;
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
        Sweep::new(cycle, self.config.width, Stage::Execute)
            .stamps(Stage::Write, self.config.write_latency)
            .tag("bu-w")
            .run(&mut self.exec_buffer, &mut self.write_buffer, state, pass);
    }

    fn execute(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Read)
            .stamps(Stage::Execute, self.config.exec_latency)
            .tag("bu-e")
            .run(&mut self.read_buffer, &mut self.exec_buffer, state, pass);
    }

    fn read(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Decode)
            .stamps(Stage::Read, self.config.read_latency)
            .tag("bu-r")
            .run(&mut self.decode_buffer, &mut self.read_buffer, state, pass);
    }

    fn decode(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Issue)
            .stamps(Stage::Decode, self.config.decode_latency)
            .tag("bu-d")
            .run(&mut self.issue_buffer, &mut self.decode_buffer, state, pass);
    }
}

impl ExecutionUnit for BranchUnit {
    fn kind(&self) -> Kind {
        Kind::Branch
    }

    fn issue_buffer(&self) -> &Fifo<Uop> {
        &self.issue_buffer
    }

    fn issue_buffer_mut(&mut self) -> &mut Fifo<Uop> {
        &mut self.issue_buffer
    }

    fn is_valid_uop(&self, uop: &Uop) -> bool {
        uop.instruction.is_branch()
    }

    fn num_in_flight(&self) -> usize {
        self.issue_buffer.len()
            + self.decode_buffer.len()
            + self.read_buffer.len()
            + self.exec_buffer.len()
            + self.write_buffer.len()
    }

    fn count_issued(&self, _uop: &Uop, state: &mut core::State) {
        state.stats.instructions.branch += 1;
    }

    fn run(&mut self, cycle: u64, state: &mut core::State) {
        self.complete(cycle, state);
        self.write(cycle, state);
        self.execute(cycle, state);
        self.read(cycle, state);
        self.decode(cycle, state);
    }
}
