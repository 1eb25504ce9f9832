use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    strum::Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub enum AccessKind {
    Load,
    Store,
    NCStore,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerKind {
    pub load: u64,
    pub store: u64,
    pub nc_store: u64,
}

impl PerKind {
    pub fn inc(&mut self, kind: AccessKind, count: u64) {
        match kind {
            AccessKind::Load => self.load += count,
            AccessKind::Store => self.store += count,
            AccessKind::NCStore => self.nc_store += count,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.load + self.store + self.nc_store
    }
}

impl std::ops::AddAssign for PerKind {
    fn add_assign(&mut self, other: Self) {
        self.load += other.load;
        self.store += other.store;
        self.nc_store += other.nc_store;
    }
}

/// Memory access statistics.
///
/// Records the number of accesses sent from a compute unit to each of its
/// memory modules.
#[derive(Clone, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Accesses {
    pub scalar: PerKind,
    pub vector: PerKind,
    pub lds: PerKind,
    /// Vector work-item accesses satisfied by an access of the same instruction.
    pub coalesced: u64,
}

impl std::ops::AddAssign for Accesses {
    fn add_assign(&mut self, other: Self) {
        self.scalar += other.scalar;
        self.vector += other.vector;
        self.lds += other.lds;
        self.coalesced += other.coalesced;
    }
}
