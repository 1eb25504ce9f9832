use crate::{address, config, mmu};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum AccessKind {
    Load,
    Store,
    /// Store that bypasses coherence
    NCStore,
}

impl From<AccessKind> for stats::mem::AccessKind {
    fn from(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Load => Self::Load,
            AccessKind::Store => Self::Store,
            AccessKind::NCStore => Self::NCStore,
        }
    }
}

/// Completion tracker for a group of memory accesses.
///
/// Every access handed to a memory module increments the witness,
/// every completed access acknowledges it.
/// The accesses are complete once no access is pending.
#[derive(Debug, Clone, Default)]
pub struct Witness(Arc<AtomicUsize>);

impl Witness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn acknowledge(&self) {
        let before = self.0.fetch_sub(1, Ordering::SeqCst);
        assert!(before > 0, "acknowledged more accesses than issued");
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pending(&self) -> bool {
        self.outstanding() > 0
    }
}

/// A memory module as seen by the compute unit.
pub trait Module: std::fmt::Debug + Send + Sync + 'static {
    /// Whether an access to `addr` would be accepted this cycle.
    fn can_access(&self, addr: address) -> bool;

    /// Start an access.
    ///
    /// The module increments `witness` and acknowledges it on completion.
    fn access(&mut self, kind: AccessKind, addr: address, witness: &Witness);

    /// Advance the module to `cycle`.
    fn cycle(&mut self, cycle: u64);
}

#[derive(Debug)]
struct InFlight {
    block: address,
    ready_at: u64,
    witnesses: SmallVec<[Witness; 4]>,
}

/// Memory module with fixed latency and a limited number of ports.
///
/// Accesses to a block that is already in flight merge into the pending
/// access and do not occupy a port.
#[derive(Debug)]
pub struct LatencyModule {
    name: String,
    latency: u64,
    num_ports: usize,
    block_size: u64,
    cycle: u64,
    used_ports: usize,
    in_flight: VecDeque<InFlight>,
}

impl LatencyModule {
    #[must_use]
    pub fn new(name: impl Into<String>, config: &config::MemoryModule) -> Self {
        Self {
            name: name.into(),
            latency: config.latency,
            num_ports: config.num_ports,
            block_size: config.block_size,
            cycle: 0,
            used_ports: 0,
            in_flight: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn block(&self, addr: address) -> address {
        addr & !(self.block_size - 1)
    }
}

impl Module for LatencyModule {
    fn can_access(&self, addr: address) -> bool {
        let block = self.block(addr);
        self.used_ports < self.num_ports || self.in_flight.iter().any(|a| a.block == block)
    }

    fn access(&mut self, kind: AccessKind, addr: address, witness: &Witness) {
        let block = self.block(addr);
        witness.expect();
        if let Some(pending) = self.in_flight.iter_mut().find(|a| a.block == block) {
            log::trace!("{}: {kind} {addr:#x} merged into block {block:#x}", self.name);
            pending.witnesses.push(witness.clone());
            return;
        }
        assert!(
            self.used_ports < self.num_ports,
            "{}: access to {addr:#x} without a free port",
            self.name
        );
        self.used_ports += 1;
        let ready_at = self.cycle + self.latency;
        log::trace!(
            "{}: {kind} {addr:#x} (block {block:#x}) ready at cycle {ready_at}",
            self.name
        );
        self.in_flight.push_back(InFlight {
            block,
            ready_at,
            witnesses: smallvec::smallvec![witness.clone()],
        });
    }

    fn cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
        self.used_ports = 0;
        // accesses complete in order since the latency is fixed
        while self
            .in_flight
            .front()
            .is_some_and(|access| access.ready_at <= cycle)
        {
            if let Some(access) = self.in_flight.pop_front() {
                for witness in &access.witnesses {
                    witness.acknowledge();
                }
            }
        }
    }
}

/// Memory modules connected to a compute unit.
#[derive(Debug)]
pub struct Memory {
    pub scalar_cache: Box<dyn Module>,
    pub vector_cache: Box<dyn Module>,
    pub lds: Box<dyn Module>,
    pub mmu: Arc<Mutex<mmu::Mmu>>,
}

impl Memory {
    #[must_use]
    pub fn new(compute_unit_id: usize, config: &config::Memory, mmu: Arc<Mutex<mmu::Mmu>>) -> Self {
        Self {
            scalar_cache: Box::new(LatencyModule::new(
                format!("cu{compute_unit_id}-scalar-cache"),
                &config.scalar_cache,
            )),
            vector_cache: Box::new(LatencyModule::new(
                format!("cu{compute_unit_id}-vector-cache"),
                &config.vector_cache,
            )),
            lds: Box::new(LatencyModule::new(
                format!("cu{compute_unit_id}-lds"),
                &config.lds,
            )),
            mmu,
        }
    }

    pub fn cycle(&mut self, cycle: u64) {
        self.scalar_cache.cycle(cycle);
        self.vector_cache.cycle(cycle);
        self.lds.cycle(cycle);
    }

    #[must_use]
    pub fn translate(&self, address_space: usize, virtual_addr: address) -> address {
        self.mmu.lock().translate(address_space, virtual_addr)
    }
}
