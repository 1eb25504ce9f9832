use serde::{Deserialize, Serialize};

/// Instruction encoding formats.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Format {
    SOP2,
    SOPK,
    SOP1,
    SOPC,
    SOPP,
    SMRD,
    VOP2,
    VOP1,
    VOPC,
    VOP3a,
    VOP3b,
    VINTRP,
    DS,
    MUBUF,
    MTBUF,
    MIMG,
    EXP,
}

/// Well-known SOPP opcodes.
pub mod sopp {
    pub const S_ENDPGM: u32 = 1;
    pub const S_BRANCH: u32 = 2;
    pub const S_CBRANCH_EXECNZ: u32 = 9;
    pub const S_BARRIER: u32 = 10;
    pub const S_WAITCNT: u32 = 12;
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub format: Format,
    pub opcode: u32,
    pub name: String,
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}[{}]", self.format, self.opcode)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

impl Instruction {
    #[must_use]
    pub fn new(format: Format, opcode: u32) -> Self {
        Self {
            format,
            opcode,
            name: String::new(),
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// SOPP opcodes 2 to 9 (inclusive) are branches.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.format == Format::SOPP
            && (sopp::S_BRANCH..=sopp::S_CBRANCH_EXECNZ).contains(&self.opcode)
    }

    #[must_use]
    pub fn is_scalar(&self) -> bool {
        match self.format {
            Format::SOP2 | Format::SOPK | Format::SOP1 | Format::SOPC | Format::SMRD => true,
            Format::SOPP => !self.is_branch(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_simd(&self) -> bool {
        matches!(
            self.format,
            Format::VOP2 | Format::VOP1 | Format::VOPC | Format::VOP3a | Format::VOP3b
        )
    }

    #[must_use]
    pub fn is_vector_memory(&self) -> bool {
        matches!(self.format, Format::MUBUF | Format::MTBUF)
    }

    #[must_use]
    pub fn is_lds(&self) -> bool {
        self.format == Format::DS
    }
}
