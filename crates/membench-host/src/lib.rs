//! Host model and protection-variant table.
//!
//! Decides which memory-protection variants can be built and timed on a
//! given host. Everything here is pure data plus predicates; no process is
//! spawned and no file is touched.

mod host;
mod resolver;
mod variant;

pub use host::*;
pub use resolver::*;
pub use variant::*;

use thiserror::Error;

/// Host description errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("unsupported word width {0} (expected 32 or 64)")]
    InvalidWordWidth(u32),
    #[error("invalid target triple '{0}'")]
    InvalidTriple(String),
}
