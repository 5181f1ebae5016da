//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use membench::toolchain::DEFAULT_TOOL_NAME;
use membench::{CpuFamily, Reduction, TargetTriple, WordWidth};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "membench")]
#[command(about = "Memory-protection overhead benchmarks - native vs. wasm-lowered executables")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build every program, benchmark it and write the ratio table
    Run {
        #[command(flatten)]
        suite: SuiteArgs,

        #[command(flatten)]
        host: HostArgs,

        #[command(flatten)]
        tools: ToolArgs,

        #[command(flatten)]
        bench: BenchArgs,
    },
    /// Build every program without benchmarking
    Build {
        #[command(flatten)]
        suite: SuiteArgs,

        #[command(flatten)]
        host: HostArgs,

        #[command(flatten)]
        tools: ToolArgs,
    },
    /// Show the programs and the variants that would be built on this host
    List {
        #[command(flatten)]
        suite: SuiteArgs,

        #[command(flatten)]
        host: HostArgs,
    },
}

/// Which programs to build.
#[derive(Args, Clone, Debug, Default)]
pub struct SuiteArgs {
    /// Program registry file (TOML, `[[program]]` tables) instead of the built-in suite
    #[arg(long, value_name = "FILE")]
    pub programs: Option<PathBuf>,

    /// Only these programs (comma-separated)
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub only: Vec<String>,
}

/// Host description overrides.
#[derive(Args, Clone, Debug, Default)]
pub struct HostArgs {
    /// Compilation target triple (e.g. x86_64-pc-linux-gnu, thumbv7em-none-unknown-eabi)
    #[arg(long, value_name = "TRIPLE")]
    pub target: Option<TargetTriple>,

    /// Host word width (default: detected)
    #[arg(long, value_enum)]
    pub host_bits: Option<HostBitsArg>,

    /// Host CPU family (default: detected)
    #[arg(long, value_enum)]
    pub host_arch: Option<HostArchArg>,
}

/// Directory layout and external tools.
#[derive(Args, Clone, Debug)]
pub struct ToolArgs {
    /// Project root (lowering tool is built under ROOT/target)
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Benchmark programs directory [default: ROOT/code_benches]
    #[arg(long)]
    pub bench_root: Option<PathBuf>,

    /// Runtime sources directory [default: ROOT/runtime]
    #[arg(long)]
    pub runtime_dir: Option<PathBuf>,

    /// Wasm toolchain install [default: ROOT/wasmception]
    #[arg(long)]
    pub wasm_toolchain: Option<PathBuf>,

    /// Use the release build of the lowering tool
    #[arg(long, conflicts_with = "debug")]
    pub release: bool,

    /// Use the debug build of the lowering tool
    #[arg(long)]
    pub debug: bool,

    /// Explicit lowering tool binary (skips profile selection)
    #[arg(long, value_name = "PATH", conflicts_with_all = ["release", "debug"])]
    pub tool: Option<PathBuf>,

    /// Lowering tool binary name under ROOT/target/<profile>/
    #[arg(long, default_value = DEFAULT_TOOL_NAME)]
    pub tool_name: String,

    /// C compiler command (native and variant builds)
    #[arg(long, default_value = "clang")]
    pub cc: String,

    /// C++ compiler command (multi-language programs)
    #[arg(long, default_value = "clang++")]
    pub cxx: String,

    /// Wasm C compiler [default: WASM_TOOLCHAIN/dist/bin/clang]
    #[arg(long)]
    pub wasm_cc: Option<PathBuf>,

    /// Build without debug symbols
    #[arg(long)]
    pub no_debug_symbols: bool,

    /// Number of parallel build jobs (0 = auto)
    #[arg(short = 'j', long, default_value = "0")]
    pub jobs: usize,

    /// Kill any build step or benchmark run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Measurement and output options.
#[derive(Args, Clone, Debug)]
pub struct BenchArgs {
    /// Runs per measurement
    #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    pub runs: u32,

    /// How runs are reduced to one time
    #[arg(long, value_enum, default_value = "min")]
    pub reduction: ReductionArg,

    /// CSV output [default: BENCH_ROOT/benchmarks.csv]
    #[arg(long, value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Also write a markdown report with system information
    #[arg(long, value_name = "PATH")]
    pub markdown: Option<PathBuf>,
}

// ============================================================================
// Argument types with conversions
// ============================================================================

/// Sample reduction strategy.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum ReductionArg {
    /// Fastest run (default)
    #[default]
    Min,
    /// Middle run
    Median,
    /// Average of all runs
    Mean,
}

impl From<ReductionArg> for Reduction {
    fn from(arg: ReductionArg) -> Self {
        match arg {
            ReductionArg::Min => Self::Min,
            ReductionArg::Median => Self::Median,
            ReductionArg::Mean => Self::Mean,
        }
    }
}

/// Host word width.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum HostBitsArg {
    #[value(name = "32")]
    Bits32,
    #[value(name = "64")]
    Bits64,
}

impl From<HostBitsArg> for WordWidth {
    fn from(arg: HostBitsArg) -> Self {
        match arg {
            HostBitsArg::Bits32 => Self::Bits32,
            HostBitsArg::Bits64 => Self::Bits64,
        }
    }
}

/// Host CPU family.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum HostArchArg {
    X86,
    Arm,
    Other,
}

impl From<HostArchArg> for CpuFamily {
    fn from(arg: HostArchArg) -> Self {
        match arg {
            HostArchArg::X86 => Self::X86,
            HostArchArg::Arm => Self::Arm,
            HostArchArg::Other => Self::Other,
        }
    }
}
