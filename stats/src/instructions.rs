use serde::{Deserialize, Serialize};

/// Issued instructions by execution unit.
#[derive(Clone, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstructionCounts {
    pub branch: u64,
    pub scalar_alu: u64,
    pub scalar_memory: u64,
    pub simd: u64,
    pub vector_memory: u64,
    pub lds: u64,
}

impl InstructionCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.branch
            + self.scalar_alu
            + self.scalar_memory
            + self.simd
            + self.vector_memory
            + self.lds
    }
}

impl std::ops::AddAssign for InstructionCounts {
    fn add_assign(&mut self, other: Self) {
        self.branch += other.branch;
        self.scalar_alu += other.scalar_alu;
        self.scalar_memory += other.scalar_memory;
        self.simd += other.simd;
        self.vector_memory += other.vector_memory;
        self.lds += other.lds;
    }
}
