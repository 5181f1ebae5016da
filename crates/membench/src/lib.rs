//! membench - memory-protection overhead benchmarks
//!
//! Builds every program of a suite natively and through wasm, lowers the
//! wasm to bytecode, links that bytecode against one runtime per
//! memory-protection variant, then times all executables and tabulates each
//! variant's speed relative to native.
//!
//! # Example
//!
//! ```ignore
//! use membench::{Host, Layout, MeasurePolicy, Pipeline, Registry, Toolchain, resolve};
//!
//! let layout = Layout::new(".");
//! let toolchain = Toolchain::new(&layout, "target/release/silverfish");
//! let plan = resolve(&Host::detect());
//! let builds = Pipeline::new(layout, toolchain, plan).build_all(&Registry::builtin())?;
//! ```

// Re-export from the host crate
pub use membench_host::{
    BuildMode, BytecodeFlavor, CpuFamily, Host, HostError, ProtectionVariant, TargetTriple,
    VARIANTS, VariantInfo, VariantPlan, WordWidth, applicable_variants, resolve,
};

pub mod command;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod runner;
pub mod toolchain;

pub use command::{CommandOutput, Streams, ToolCommand};
pub use error::{BuildError, CommandError, ConfigError, Error, MeasureError, Result};
pub use pipeline::{BuildArtifact, Pipeline, ProgramBuild, StageKind};
pub use registry::{ProgramSpec, Registry};
pub use report::{Report, ReportRow, build_row};
pub use runner::{
    Column, MeasurePolicy, ProgramTimings, RUN_COUNT, Reduction, TimingSample, bench_program,
    measure, measure_with,
};
pub use toolchain::{Layout, ProfileSelection, Toolchain};
