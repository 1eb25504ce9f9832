#![allow(non_camel_case_types, clippy::upper_case_acronyms)]

pub mod instructions;
pub mod mem;
pub mod sim;

pub use instructions::InstructionCounts;
pub use mem::Accesses;
pub use sim::Sim;

use serde::{Deserialize, Serialize};

/// Statistics of a single compute unit.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnit {
    pub id: usize,
    pub instructions: InstructionCounts,
    pub accesses: Accesses,
    pub mapped_work_groups: u64,
    pub completed_work_groups: u64,
}

impl ComputeUnit {
    #[must_use]
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sim: Sim,
    pub instructions: InstructionCounts,
    pub accesses: Accesses,
    pub compute_units: Vec<ComputeUnit>,
}

impl Stats {
    /// Aggregate per compute unit statistics.
    #[must_use]
    pub fn new(sim: Sim, compute_units: Vec<ComputeUnit>) -> Self {
        let mut instructions = InstructionCounts::default();
        let mut accesses = Accesses::default();
        for cu in &compute_units {
            instructions += cu.instructions.clone();
            accesses += cu.accesses.clone();
        }
        Self {
            sim,
            instructions,
            accesses,
            compute_units,
        }
    }
}
