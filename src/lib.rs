#![allow(
    clippy::upper_case_acronyms,
    non_camel_case_types,
    clippy::too_many_arguments,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

pub mod barrier;
pub mod config;
pub mod core;
pub mod fetch_buffer;
pub mod fifo;
pub mod func_unit;
pub mod gpu;
pub mod instruction;
pub mod kernel;
pub mod mem;
pub mod mmu;
pub mod timing;
pub mod trace;
pub mod uop;
pub mod wavefront;
pub mod wavefront_pool;

#[cfg(test)]
pub mod testing;

pub use gpu::Gpu;
pub use timing::{FinishReason, Timing};

pub type address = u64;
