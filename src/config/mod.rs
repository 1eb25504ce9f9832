use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest supported wavefront size.
pub const MAX_WAVEFRONT_SIZE: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration parameter `{field}` must be non-zero")]
    Zero { field: &'static str },

    #[error("wavefront size {wavefront_size} exceeds the supported maximum of {max}")]
    WavefrontSizeTooLarge { wavefront_size: usize, max: usize },

    #[error("invalid memory configuration: {reason}")]
    InvalidMemory { reason: String },

    #[error(
        "work-group of {work_items_per_work_group} work-items \
        ({registers_per_work_item} registers per work-item, \
        {local_memory_per_work_group} bytes of local memory) does not fit into a wavefront pool"
    )]
    WorkGroupDoesNotFit {
        work_items_per_work_group: usize,
        registers_per_work_item: usize,
        local_memory_per_work_group: usize,
    },

    #[error("{quantity} overflows")]
    Overflow { quantity: &'static str },

    #[error("invalid kernel `{kernel}`: {reason}")]
    InvalidKernel { kernel: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] serde_yaml::Error),
}

/// Granularity of vector register allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum RegisterAllocationGranularity {
    Wavefront,
    WorkGroup,
}

/// Configuration of a pipelined execution unit with a separate execute stage.
///
/// Used by the scalar and the branch unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    /// Maximum number of instructions processed per stage and cycle
    pub width: usize, // 1
    pub issue_buffer_size: usize, // 1
    pub decode_latency: u64,      // 1
    pub decode_buffer_size: usize, // 1
    pub read_latency: u64,        // 1
    pub read_buffer_size: usize,  // 1
    pub exec_latency: u64,        // 4
    pub exec_buffer_size: usize,  // 32
    pub write_latency: u64,       // 1
    pub write_buffer_size: usize, // 1
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            width: 1,
            issue_buffer_size: 1,
            decode_latency: 1,
            decode_buffer_size: 1,
            read_latency: 1,
            read_buffer_size: 1,
            exec_latency: 4,
            exec_buffer_size: 32,
            write_latency: 1,
            write_buffer_size: 1,
        }
    }
}

impl Pipeline {
    fn branch() -> Self {
        Self {
            exec_latency: 16,
            exec_buffer_size: 16,
            ..Self::default()
        }
    }

    /// Deserialize a partial branch unit configuration.
    ///
    /// Missing fields are taken from the branch unit preset.
    fn deserialize_branch<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;
        let overrides = serde_yaml::Mapping::deserialize(deserializer)?;
        let preset = serde_yaml::to_value(Self::branch()).map_err(D::Error::custom)?;
        let serde_yaml::Value::Mapping(mut fields) = preset else {
            return Err(D::Error::custom("branch unit preset is not a mapping"));
        };
        for (field, value) in overrides {
            fields.insert(field, value);
        }
        serde_yaml::from_value(serde_yaml::Value::Mapping(fields)).map_err(D::Error::custom)
    }

    fn validate(&self, unit: &'static str) -> Result<(), Error> {
        non_zero(unit, "width", self.width)?;
        non_zero(unit, "issue_buffer_size", self.issue_buffer_size)?;
        non_zero(unit, "decode_buffer_size", self.decode_buffer_size)?;
        non_zero(unit, "read_buffer_size", self.read_buffer_size)?;
        non_zero(unit, "exec_buffer_size", self.exec_buffer_size)?;
        non_zero(unit, "write_buffer_size", self.write_buffer_size)?;
        Ok(())
    }
}

/// Configuration of a SIMD unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Simd {
    pub width: usize,                      // 1
    pub issue_buffer_size: usize,          // 1
    pub decode_latency: u64,               // 1
    pub decode_buffer_size: usize,         // 1
    pub read_exec_write_latency: u64,      // 8
    pub read_exec_write_buffer_size: usize, // 2
}

impl Default for Simd {
    fn default() -> Self {
        Self {
            width: 1,
            issue_buffer_size: 1,
            decode_latency: 1,
            decode_buffer_size: 1,
            read_exec_write_latency: 8,
            read_exec_write_buffer_size: 2,
        }
    }
}

/// Configuration of the LDS and vector memory units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPipeline {
    pub width: usize,              // 1
    pub issue_buffer_size: usize,  // 1
    pub decode_latency: u64,       // 1
    pub decode_buffer_size: usize, // 1
    pub read_latency: u64,         // 1
    pub read_buffer_size: usize,   // 1
    /// Capacity of the memory stage
    pub max_inflight_mem_accesses: usize, // 32
    pub write_latency: u64,        // 1
    pub write_buffer_size: usize,  // 1
}

impl Default for MemoryPipeline {
    fn default() -> Self {
        Self {
            width: 1,
            issue_buffer_size: 1,
            decode_latency: 1,
            decode_buffer_size: 1,
            read_latency: 1,
            read_buffer_size: 1,
            max_inflight_mem_accesses: 32,
            write_latency: 1,
            write_buffer_size: 1,
        }
    }
}

impl MemoryPipeline {
    fn validate(&self, unit: &'static str) -> Result<(), Error> {
        non_zero(unit, "width", self.width)?;
        non_zero(unit, "issue_buffer_size", self.issue_buffer_size)?;
        non_zero(unit, "decode_buffer_size", self.decode_buffer_size)?;
        non_zero(unit, "read_buffer_size", self.read_buffer_size)?;
        non_zero(
            unit,
            "max_inflight_mem_accesses",
            self.max_inflight_mem_accesses,
        )?;
        non_zero(unit, "write_buffer_size", self.write_buffer_size)?;
        Ok(())
    }
}

/// Fixed latency memory module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryModule {
    pub latency: u64,
    /// New block accesses accepted per cycle
    pub num_ports: usize,
    pub block_size: u64,
}

/// Memory hierarchy seen by a compute unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub page_size: u64, // 4096
    pub scalar_cache: MemoryModule,
    pub vector_cache: MemoryModule,
    pub lds: MemoryModule,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            page_size: 4096,
            scalar_cache: MemoryModule {
                latency: 2,
                num_ports: 2,
                block_size: 64,
            },
            vector_cache: MemoryModule {
                latency: 2,
                num_ports: 4,
                block_size: 64,
            },
            lds: MemoryModule {
                latency: 2,
                num_ports: 2,
                block_size: 64,
            },
        }
    }
}

impl Memory {
    fn validate(&self) -> Result<(), Error> {
        if !self.page_size.is_power_of_two() {
            return Err(Error::InvalidMemory {
                reason: format!("page size {} is not a power of two", self.page_size),
            });
        }
        for (name, module) in [
            ("scalar_cache", &self.scalar_cache),
            ("vector_cache", &self.vector_cache),
            ("lds", &self.lds),
        ] {
            if module.num_ports == 0 {
                return Err(Error::InvalidMemory {
                    reason: format!("{name} has no ports"),
                });
            }
            if !module.block_size.is_power_of_two() {
                return Err(Error::InvalidMemory {
                    reason: format!(
                        "{name} block size {} is not a power of two",
                        module.block_size
                    ),
                });
            }
        }
        Ok(())
    }
}

/// GPU configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GPU {
    /// Number of compute units
    pub num_compute_units: usize, // 32
    /// Number of work-items per wavefront
    pub wavefront_size: usize, // 64
    /// Number of wavefront pools (and SIMD units) per compute unit
    pub num_wavefront_pools: usize, // 4
    pub max_work_groups_per_wavefront_pool: usize, // 10
    pub max_wavefronts_per_wavefront_pool: usize,  // 10
    /// Vector registers available to a wavefront pool
    pub num_vector_registers: usize, // 65536
    pub register_allocation_size: usize, // 32
    pub register_allocation_granularity: RegisterAllocationGranularity, // Wavefront
    /// Local data share size in bytes
    pub lds_size: usize, // 65536
    pub lds_allocation_size: usize, // 64

    pub fetch_latency: u64,    // 1
    pub fetch_width: usize,    // 1
    pub fetch_buffer_size: usize, // 10
    pub issue_latency: u64,    // 1
    pub max_instructions_issued_per_type: usize, // 1

    pub scalar_unit: Pipeline,
    #[serde(deserialize_with = "Pipeline::deserialize_branch")]
    pub branch_unit: Pipeline,
    pub simd_unit: Simd,
    pub vector_memory_unit: MemoryPipeline,
    pub lds_unit: MemoryPipeline,
    pub memory: Memory,

    /// Number of cycles without a completed instruction before the
    /// simulation is considered stalled
    pub stall_threshold: u64, // 1_000_000
    pub max_cycles: Option<u64>,
    pub max_instructions: Option<u64>,
}

impl Default for GPU {
    fn default() -> Self {
        Self {
            num_compute_units: 32,
            wavefront_size: 64,
            num_wavefront_pools: 4,
            max_work_groups_per_wavefront_pool: 10,
            max_wavefronts_per_wavefront_pool: 10,
            num_vector_registers: 65536,
            register_allocation_size: 32,
            register_allocation_granularity: RegisterAllocationGranularity::Wavefront,
            lds_size: 65536,
            lds_allocation_size: 64,
            fetch_latency: 1,
            fetch_width: 1,
            fetch_buffer_size: 10,
            issue_latency: 1,
            max_instructions_issued_per_type: 1,
            scalar_unit: Pipeline::default(),
            branch_unit: Pipeline::branch(),
            simd_unit: Simd::default(),
            vector_memory_unit: MemoryPipeline::default(),
            lds_unit: MemoryPipeline::default(),
            memory: Memory::default(),
            stall_threshold: 1_000_000,
            max_cycles: None,
            max_instructions: None,
        }
    }
}

fn non_zero(unit: &'static str, field: &'static str, value: usize) -> Result<(), Error> {
    if value == 0 {
        log::error!("{unit}.{field} is zero");
        return Err(Error::Zero { field });
    }
    Ok(())
}

impl GPU {
    /// Parse a YAML configuration.
    ///
    /// Missing fields keep their default values.
    pub fn parse(yaml: impl AsRef<str>) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(yaml.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        Self::parse(yaml)
    }

    pub fn validate(&self) -> Result<(), Error> {
        non_zero("gpu", "num_compute_units", self.num_compute_units)?;
        non_zero("gpu", "wavefront_size", self.wavefront_size)?;
        non_zero("gpu", "num_wavefront_pools", self.num_wavefront_pools)?;
        non_zero(
            "gpu",
            "max_work_groups_per_wavefront_pool",
            self.max_work_groups_per_wavefront_pool,
        )?;
        non_zero(
            "gpu",
            "max_wavefronts_per_wavefront_pool",
            self.max_wavefronts_per_wavefront_pool,
        )?;
        non_zero("gpu", "register_allocation_size", self.register_allocation_size)?;
        non_zero("gpu", "lds_allocation_size", self.lds_allocation_size)?;
        non_zero("gpu", "fetch_width", self.fetch_width)?;
        non_zero("gpu", "fetch_buffer_size", self.fetch_buffer_size)?;
        non_zero(
            "gpu",
            "max_instructions_issued_per_type",
            self.max_instructions_issued_per_type,
        )?;
        if self.wavefront_size > MAX_WAVEFRONT_SIZE {
            return Err(Error::WavefrontSizeTooLarge {
                wavefront_size: self.wavefront_size,
                max: MAX_WAVEFRONT_SIZE,
            });
        }
        self.scalar_unit.validate("scalar_unit")?;
        self.branch_unit.validate("branch_unit")?;
        non_zero("simd_unit", "width", self.simd_unit.width)?;
        non_zero("simd_unit", "issue_buffer_size", self.simd_unit.issue_buffer_size)?;
        non_zero(
            "simd_unit",
            "decode_buffer_size",
            self.simd_unit.decode_buffer_size,
        )?;
        non_zero(
            "simd_unit",
            "read_exec_write_buffer_size",
            self.simd_unit.read_exec_write_buffer_size,
        )?;
        self.vector_memory_unit.validate("vector_memory_unit")?;
        self.lds_unit.validate("lds_unit")?;
        self.memory.validate()?;
        Ok(())
    }

    /// Number of work-group slots of a compute unit.
    #[must_use]
    pub fn max_work_groups_per_compute_unit(&self) -> usize {
        self.max_work_groups_per_wavefront_pool * self.num_wavefront_pools
    }

    /// Number of wavefronts needed for a work-group.
    #[must_use]
    pub fn wavefronts_per_work_group(&self, work_items_per_work_group: usize) -> usize {
        work_items_per_work_group.div_ceil(self.wavefront_size)
    }
}
