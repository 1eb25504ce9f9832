use super::{
    pipeline::{pass, Gate, Retire, Sweep},
    ExecutionUnit, Kind,
};
use crate::{
    config, core,
    fifo::Fifo,
    mem,
    uop::{Stage, Uop},
    wavefront_pool::Counter,
};

/// Executes scalar ALU and scalar memory instructions.
///
/// Completion of the last instruction of a wavefront finishes the
/// wavefront and, once all wavefronts finished, the work-group.
#[derive(Debug)]
pub struct ScalarUnit {
    config: config::Pipeline,
    issue_buffer: Fifo<Uop>,
    decode_buffer: Fifo<Uop>,
    read_buffer: Fifo<Uop>,
    exec_buffer: Fifo<Uop>,
    write_buffer: Fifo<Uop>,
}

impl ScalarUnit {
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
        // the last instruction waits for all outstanding accesses of its wavefront
        let gate = |uop: &mut Uop, state: &mut core::State| {
            if uop.wavefront_last_instruction && !state.entry(uop.entry).no_outstanding_accesses() {
                Gate::Stall
            } else {
                Gate::Pass
            }
        };
        let mut retire = Retire(|uop: Uop, state: &mut core::State| {
            let entry = state.entry_mut(uop.entry);
            if uop.scalar_memory_read {
                entry.decrement(Counter::Lgkm);
            }
            if uop.memory_wait {
                entry.mem_wait = true;
            }
            entry.ready = true;
            if uop.at_barrier {
                entry.wait_for_barrier = true;
                state.arrive_at_barrier(uop.wavefront);
            }
            if uop.wavefront_last_instruction {
                state.entry_mut(uop.entry).wavefront_finished = true;
                state.finish_wavefront(uop.wavefront);
            }
            state.retire(&uop, cycle);
        });
        Sweep::new(cycle, self.config.width, Stage::Write).run(
            &mut self.write_buffer,
            &mut retire,
            state,
            gate,
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
            .tag("su-w")
            .run(&mut self.exec_buffer, &mut self.write_buffer, state, gate);
    }

    fn execute(&mut self, cycle: u64, state: &mut core::State) {
        // scalar memory reads access the scalar cache when entering execute
        let gate = |uop: &mut Uop, state: &mut core::State| {
            let Some(ref mut access) = uop.scalar_access else {
                return Gate::Pass;
            };
            if access.issued {
                return Gate::Pass;
            }
            let physical_addr = state.memory.translate(uop.address_space, access.addr);
            if !state.memory.scalar_cache.can_access(physical_addr) {
                return Gate::Stall;
            }
            state.memory.scalar_cache.access(
                mem::AccessKind::Load,
                physical_addr,
                &uop.global_memory_witness,
            );
            state
                .stats
                .accesses
                .scalar
                .inc(mem::AccessKind::Load.into(), 1);
            access.issued = true;
            Gate::Pass
        };
        Sweep::new(cycle, self.config.width, Stage::Read)
            .stamps(Stage::Execute, self.config.exec_latency)
            .tag("su-e")
            .run(&mut self.read_buffer, &mut self.exec_buffer, state, gate);
    }

    fn read(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Decode)
            .stamps(Stage::Read, self.config.read_latency)
            .tag("su-r")
            .run(&mut self.decode_buffer, &mut self.read_buffer, state, pass);
    }

    fn decode(&mut self, cycle: u64, state: &mut core::State) {
        Sweep::new(cycle, self.config.width, Stage::Issue)
            .stamps(Stage::Decode, self.config.decode_latency)
            .tag("su-d")
            .run(&mut self.issue_buffer, &mut self.decode_buffer, state, pass);
    }
}

impl ExecutionUnit for ScalarUnit {
    fn kind(&self) -> Kind {
        Kind::Scalar
    }

    fn issue_buffer(&self) -> &Fifo<Uop> {
        &self.issue_buffer
    }

    fn issue_buffer_mut(&mut self) -> &mut Fifo<Uop> {
        &mut self.issue_buffer
    }

    fn is_valid_uop(&self, uop: &Uop) -> bool {
        uop.instruction.is_scalar()
    }

    fn num_in_flight(&self) -> usize {
        self.issue_buffer.len()
            + self.decode_buffer.len()
            + self.read_buffer.len()
            + self.exec_buffer.len()
            + self.write_buffer.len()
    }

    fn count_issued(&self, uop: &Uop, state: &mut core::State) {
        if uop.scalar_memory_read {
            state.stats.instructions.scalar_memory += 1;
            state.entry_mut(uop.entry).increment(Counter::Lgkm);
        } else {
            state.stats.instructions.scalar_alu += 1;
        }
    }

    fn run(&mut self, cycle: u64, state: &mut core::State) {
        self.complete(cycle, state);
        self.write(cycle, state);
        self.execute(cycle, state);
        self.read(cycle, state);
        self.decode(cycle, state);
    }
}
