use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sim {
    pub cycles: u64,
    pub fetched_instructions: u64,
    pub completed_instructions: u64,
    pub mapped_work_groups: u64,
    pub completed_work_groups: u64,
    pub completed_nd_ranges: u64,
}

