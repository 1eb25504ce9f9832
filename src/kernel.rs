use crate::{
    address,
    barrier::Barrier,
    config,
    instruction::{sopp, Format},
    wavefront::{self, Wavefront, WorkGroup},
};
use color_eyre::eyre::{self, WrapErr};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
    Atomic,
}

const fn default_access_size() -> u32 {
    4
}

/// Per work-item memory access pattern of an instruction.
///
/// Work-item `i` accesses `base + stride * i`, where `i` is the global id
/// for vector memory and the local id for LDS instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessPattern {
    pub kind: AccessKind,
    pub base: address,
    #[serde(default)]
    pub stride: u64,
    #[serde(default = "default_access_size")]
    pub size: u32,
    #[serde(default)]
    pub global_coherency: bool,
}

impl AccessPattern {
    /// Address accessed by work-item `id`, `None` on overflow.
    #[must_use]
    pub fn addr(&self, id: u64) -> Option<address> {
        self.stride
            .checked_mul(id)
            .and_then(|offset| self.base.checked_add(offset))
    }
}

/// One instruction of a kernel trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceInstruction {
    pub format: Format,
    pub opcode: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessPattern>,
}

impl TraceInstruction {
    #[must_use]
    pub fn new(format: Format, opcode: u32) -> Self {
        Self {
            format,
            opcode,
            name: None,
            access: None,
        }
    }

    #[must_use]
    pub fn with_access(mut self, access: AccessPattern) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub fn end_program() -> Self {
        Self {
            name: Some("s_endpgm".to_string()),
            ..Self::new(Format::SOPP, sopp::S_ENDPGM)
        }
    }

    #[must_use]
    pub fn is_end_of_program(&self) -> bool {
        self.format == Format::SOPP && self.opcode == sopp::S_ENDPGM
    }
}

/// Kernel description.
///
/// Every wavefront of the kernel executes the same `program`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Kernel {
    pub name: String,
    pub global_size: usize,
    pub local_size: usize,
    #[serde(default)]
    pub registers_per_work_item: usize,
    /// Local memory in bytes
    #[serde(default)]
    pub local_memory_per_work_group: usize,
    pub program: Vec<TraceInstruction>,
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({} work-items, {} per work-group)",
            self.name, self.global_size, self.local_size
        )
    }
}

impl Kernel {
    /// Load a kernel from a JSON or YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read kernel {}", path.display()))?;
        let kernel: Self = match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("yaml" | "yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        kernel.validate()?;
        Ok(kernel)
    }

    fn invalid(&self, reason: impl Into<String>) -> config::Error {
        config::Error::InvalidKernel {
            kernel: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<(), config::Error> {
        if self.local_size == 0 {
            return Err(self.invalid("local size must be non-zero"));
        }
        if self.global_size % self.local_size != 0 {
            return Err(self.invalid(format!(
                "global size {} is not a multiple of local size {}",
                self.global_size, self.local_size
            )));
        }
        if !self.program.last().is_some_and(TraceInstruction::is_end_of_program) {
            return Err(self.invalid("program does not end with s_endpgm"));
        }
        for (pc, inst) in self.program.iter().enumerate() {
            match (inst.format, &inst.access) {
                (Format::MUBUF | Format::MTBUF | Format::DS, None) => {
                    return Err(self.invalid(format!(
                        "{} instruction at {pc} has no access pattern",
                        inst.format
                    )));
                }
                (Format::SMRD, Some(access)) if access.kind != AccessKind::Read => {
                    return Err(self.invalid(format!(
                        "scalar memory instruction at {pc} must be a read"
                    )));
                }
                (Format::MIMG | Format::EXP | Format::VINTRP, _) => {
                    return Err(self.invalid(format!(
                        "unsupported instruction format {} at {pc}",
                        inst.format
                    )));
                }
                _ => {}
            }
            let last_id = match inst.format {
                Format::MUBUF | Format::MTBUF => self.global_size,
                Format::DS => self.local_size,
                _ => continue,
            };
            let overflows = inst
                .access
                .as_ref()
                .is_some_and(|access| access.addr(last_id.saturating_sub(1) as u64).is_none());
            if overflows {
                return Err(self.invalid(format!(
                    "access pattern of instruction at {pc} overflows the address space"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn num_work_groups(&self) -> usize {
        self.global_size / self.local_size
    }
}

/// A launched kernel.
#[derive(Debug)]
pub struct NdRange {
    pub id: usize,
    pub kernel: Arc<Kernel>,
    pub address_space: usize,
    /// Global id of the first wavefront of this ND-range
    pub first_wavefront_id: usize,
    pub wavefronts_per_work_group: usize,
    pub work_groups_per_wavefront_pool: usize,
    wavefront_size: usize,
    waiting: VecDeque<usize>,
    pub running: usize,
    pub completed: usize,
}

impl std::fmt::Display for NdRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NdRange({} {}: {} waiting, {} running, {} completed)",
            self.id,
            self.kernel.name,
            self.waiting.len(),
            self.running,
            self.completed
        )
    }
}

impl NdRange {
    #[must_use]
    pub fn new(
        id: usize,
        kernel: Arc<Kernel>,
        address_space: usize,
        first_wavefront_id: usize,
        work_groups_per_wavefront_pool: usize,
        config: &config::GPU,
    ) -> Self {
        let waiting = (0..kernel.num_work_groups()).collect();
        Self {
            id,
            address_space,
            first_wavefront_id,
            wavefronts_per_work_group: config.wavefronts_per_work_group(kernel.local_size),
            work_groups_per_wavefront_pool,
            wavefront_size: config.wavefront_size,
            waiting,
            running: 0,
            completed: 0,
            kernel,
        }
    }

    #[must_use]
    pub fn num_wavefronts(&self) -> usize {
        self.kernel.num_work_groups() * self.wavefronts_per_work_group
    }

    #[must_use]
    pub fn has_waiting_work_groups(&self) -> bool {
        !self.waiting.is_empty()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.waiting.is_empty() && self.running == 0
    }

    /// Materialize the next waiting work-group.
    pub fn next_work_group(&mut self) -> Option<WorkGroup> {
        let id = self.waiting.pop_front()?;
        self.running += 1;

        let local_size = self.kernel.local_size;
        let first_global_id = id * local_size;
        let wavefronts = (0..self.wavefronts_per_work_group)
            .map(|index| {
                let first_local_id = index * self.wavefront_size;
                let num_work_items = (local_size - first_local_id).min(self.wavefront_size);
                let mut active_mask = wavefront::ActiveMask::ZERO;
                active_mask[..num_work_items].fill(true);
                Wavefront {
                    id: self.first_wavefront_id + id * self.wavefronts_per_work_group + index,
                    pc: 0,
                    active_mask,
                    finished: false,
                    entry: None,
                    num_fetched: 0,
                    first_local_id,
                    first_global_id: first_global_id + first_local_id,
                }
            })
            .collect();

        Some(WorkGroup {
            id,
            nd_range_id: self.id,
            kernel: Arc::clone(&self.kernel),
            address_space: self.address_space,
            first_global_id,
            num_work_items: local_size,
            barrier: Barrier::new(self.wavefronts_per_work_group),
            wavefronts,
            slot: None,
            pool: None,
            finished_wavefronts: 0,
            in_flight: 0,
            finished_timing: false,
        })
    }

    /// Work-group completion signalled by the compute unit.
    pub fn complete(&mut self, work_group: WorkGroup) {
        assert_eq!(work_group.nd_range_id, self.id);
        assert!(work_group.finished_timing, "work-group {} is still running", work_group.id);
        assert!(self.running > 0);
        self.running -= 1;
        self.completed += 1;
        log::debug!("{self}: completed work-group {}", work_group.id);
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessKind, AccessPattern, Kernel, NdRange, TraceInstruction};
    use crate::{config, instruction::Format};
    use color_eyre::eyre;
    use std::sync::Arc;

    fn vectoradd() -> Kernel {
        Kernel {
            name: "vectoradd".to_string(),
            global_size: 192,
            local_size: 96,
            registers_per_work_item: 8,
            local_memory_per_work_group: 0,
            program: vec![TraceInstruction::end_program()],
        }
    }

    #[test]
    fn test_parse_json_kernel() -> eyre::Result<()> {
        let kernel: Kernel = serde_json::from_str(
            r#"{
                "name": "copy",
                "global_size": 128,
                "local_size": 64,
                "program": [
                    { "format": "SMRD", "opcode": 2, "name": "s_load_dwordx4",
                      "access": { "kind": "read", "base": 4096 } },
                    { "format": "MUBUF", "opcode": 12, "name": "buffer_load_dword",
                      "access": { "kind": "read", "base": 65536, "stride": 4 } },
                    { "format": "SOPP", "opcode": 12, "name": "s_waitcnt" },
                    { "format": "SOPP", "opcode": 1, "name": "s_endpgm" }
                ]
            }"#,
        )?;
        kernel.validate()?;
        assert_eq!(kernel.num_work_groups(), 2);
        assert_eq!(kernel.registers_per_work_item, 0);
        assert_eq!(
            kernel.program[1].access,
            Some(AccessPattern {
                kind: AccessKind::Read,
                base: 65536,
                stride: 4,
                size: 4,
                global_coherency: false,
            })
        );
        Ok(())
    }

    #[test]
    fn test_program_must_end_with_endpgm() {
        let mut kernel = vectoradd();
        kernel.program = vec![TraceInstruction::new(Format::VOP2, 3)];
        assert!(matches!(
            kernel.validate(),
            Err(config::Error::InvalidKernel { .. })
        ));
    }

    #[test]
    fn test_memory_instruction_needs_access() {
        let mut kernel = vectoradd();
        kernel
            .program
            .insert(0, TraceInstruction::new(Format::DS, 13));
        assert!(kernel.validate().is_err());
    }

    #[test]
    fn test_overflowing_access_pattern_is_rejected() -> eyre::Result<()> {
        let access = AccessPattern {
            kind: AccessKind::Read,
            base: u64::MAX - 1024,
            stride: 16,
            size: 4,
            global_coherency: false,
        };
        assert_eq!(access.addr(64), Some(u64::MAX));
        assert_eq!(access.addr(65), None);

        let mut kernel = vectoradd();
        kernel.program.insert(
            0,
            TraceInstruction::new(Format::DS, 54).with_access(access.clone()),
        );
        // local ids stay below 96
        assert!(kernel.validate().is_err());

        kernel.program[0].access = Some(AccessPattern {
            base: u64::MAX - 95 * 16,
            ..access
        });
        kernel.validate()?;
        kernel.program[0].format = Format::MUBUF;
        // global ids reach 191
        assert!(matches!(
            kernel.validate(),
            Err(config::Error::InvalidKernel { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_work_groups_have_partial_last_wavefront() {
        let config = config::GPU::default();
        let mut nd_range = NdRange::new(0, Arc::new(vectoradd()), 0, 100, 2, &config);
        assert_eq!(nd_range.wavefronts_per_work_group, 2);
        assert_eq!(nd_range.num_wavefronts(), 4);

        let _ = nd_range.next_work_group();
        let work_group = nd_range.next_work_group().unwrap();
        assert_eq!(work_group.id, 1);
        assert_eq!(work_group.wavefronts[0].id, 102);
        assert_eq!(work_group.wavefronts[0].active_mask.count_ones(), 64);
        assert_eq!(work_group.wavefronts[1].active_mask.count_ones(), 32);
        assert_eq!(work_group.wavefronts[1].first_global_id, 96 + 64);
        assert!(!nd_range.has_waiting_work_groups());
        assert!(!nd_range.is_finished());
        assert_eq!(nd_range.running, 2);
    }
}
