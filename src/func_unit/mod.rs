pub mod branch;
pub mod lds;
pub mod pipeline;
pub mod scalar;
pub mod simd;
pub mod vector_memory;

pub use branch::BranchUnit;
pub use lds::LdsUnit;
pub use scalar::ScalarUnit;
pub use simd::SimdUnit;
pub use vector_memory::VectorMemoryUnit;

use crate::{
    core,
    fifo::Fifo,
    uop::{Stage, Uop},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Kind {
    Branch,
    Scalar,
    Simd,
    VectorMemory,
    Lds,
}

/// Functional unit of a compute unit.
///
/// Every unit receives uops from the fetch buffer through its issue buffer
/// and moves them through a fixed sequence of stages.
pub trait ExecutionUnit: std::fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> Kind;

    fn issue_buffer(&self) -> &Fifo<Uop>;

    fn issue_buffer_mut(&mut self) -> &mut Fifo<Uop>;

    /// Whether the unit executes the instruction of `uop`.
    fn is_valid_uop(&self, uop: &Uop) -> bool;

    /// Number of uops in any stage of the unit.
    fn num_in_flight(&self) -> usize;

    /// Account for an issued uop.
    fn count_issued(&self, uop: &Uop, state: &mut core::State);

    /// Advance all stages by one cycle, last stage first.
    fn run(&mut self, cycle: u64, state: &mut core::State);

    #[must_use]
    fn can_issue(&self) -> bool {
        !self.issue_buffer().full()
    }

    fn issue(&mut self, mut uop: Uop, cycle: u64, state: &mut core::State) {
        assert!(self.can_issue(), "{} unit cannot issue {uop}", self.kind());
        assert!(
            uop.issue_ready.is_none(),
            "{uop} was already issued at cycle {:?}",
            uop.issue_ready
        );
        uop.set_ready(Stage::Issue, cycle + state.config.issue_latency);
        self.count_issued(&uop, state);
        log::trace!("{} unit: issued {uop} in cycle {cycle}", self.kind());
        state.tracer.lock().stage(&uop, "i");
        self.issue_buffer_mut().enqueue(uop);
    }
}

#[cfg(test)]
mod tests {
    use super::{BranchUnit, ExecutionUnit, LdsUnit, ScalarUnit, SimdUnit, VectorMemoryUnit};
    use crate::{
        instruction::{Format, Instruction},
        testing,
    };
    use strum::IntoEnumIterator;

    #[test]
    fn test_is_valid_uop() {
        let config = testing::config();
        let units: Vec<Box<dyn ExecutionUnit>> = vec![
            Box::new(BranchUnit::new(&config.branch_unit)),
            Box::new(ScalarUnit::new(&config.scalar_unit)),
            Box::new(SimdUnit::new(0, &config.simd_unit)),
            Box::new(VectorMemoryUnit::new(&config.vector_memory_unit)),
            Box::new(LdsUnit::new(&config.lds_unit)),
        ];
        for format in Format::iter() {
            for opcode in [0, 1, 2, 9, 10, 12] {
                let mut uop = testing::uop(format);
                uop.instruction = Instruction::new(format, opcode);
                let inst = &uop.instruction;
                let want = [
                    inst.is_branch(),
                    inst.is_scalar(),
                    inst.is_simd(),
                    inst.is_vector_memory(),
                    inst.is_lds(),
                ];
                for (unit, want) in units.iter().zip(want) {
                    assert_eq!(unit.is_valid_uop(&uop), want, "{unit:?} {format} {opcode}");
                }
            }
        }
        let mut branch = testing::uop(Format::SOPP);
        branch.instruction = Instruction::new(Format::SOPP, 4);
        assert!(units[0].is_valid_uop(&branch));
        assert!(!units[1].is_valid_uop(&branch));
    }

    #[test]
    fn test_issue_bookkeeping() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut simd = SimdUnit::new(
            0,
            &crate::config::Simd {
                issue_buffer_size: 2,
                ..config.simd_unit.clone()
            },
        );
        for _ in 0..2 {
            let uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::VOP2);
            assert!(simd.can_issue());
            simd.issue(uop, 7, &mut cu.state);
        }
        assert!(!simd.can_issue());
        assert_eq!(simd.issue_buffer().len(), 2);
        assert!(simd
            .issue_buffer()
            .iter()
            .all(|uop| uop.issue_ready == Some(7 + config.issue_latency)));
        assert_eq!(cu.state.stats.instructions.simd, 2);
    }

    #[test]
    #[should_panic(expected = "cannot issue")]
    fn test_issue_without_room_panics() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut branch = BranchUnit::new(&config.branch_unit);
        for _ in 0..2 {
            let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::SOPP);
            uop.instruction = Instruction::new(Format::SOPP, 2);
            branch.issue(uop, 1, &mut cu.state);
        }
    }

    #[test]
    #[should_panic(expected = "was already issued")]
    fn test_double_issue_panics() {
        let config = testing::config();
        let (mut cu, _) = testing::compute_unit(config.clone());
        let slot = cu.map_work_group(testing::work_group(0, 1));
        let mut scalar = ScalarUnit::new(&config.scalar_unit);
        let mut uop = testing::mapped_uop(&mut cu.state, slot, 0, Format::SOP2);
        uop.issue_ready = Some(3);
        scalar.issue(uop, 4, &mut cu.state);
    }
}
