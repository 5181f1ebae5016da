//! Command implementations.
//!
//! Each submodule handles one subcommand. Shared setup (registry, host,
//! toolchain) lives here so `run` and `build` resolve configuration the
//! same way.

mod build;
mod list;
mod report;
mod run;

use std::time::Duration;

use membench::{ConfigError, Host, Layout, Pipeline, ProfileSelection, Registry, Toolchain, resolve};
use tracing::debug;

use crate::cli::{Cli, Commands, HostArgs, SuiteArgs, ToolArgs};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Run {
            suite,
            host,
            tools,
            bench,
        } => run::cmd_run(suite, host, tools, bench),
        Commands::Build { suite, host, tools } => build::cmd_build(suite, host, tools),
        Commands::List { suite, host } => list::cmd_list(suite, host),
    }
}

/// Built-in suite or a registry file, narrowed by `--only`.
fn load_registry(args: &SuiteArgs) -> Result<Registry, ConfigError> {
    let registry = match &args.programs {
        Some(path) => Registry::load(path)?,
        None => Registry::builtin(),
    };
    if args.only.is_empty() {
        Ok(registry)
    } else {
        registry.retain_named(&args.only)
    }
}

/// Detected host with command-line overrides applied.
fn host_from(args: &HostArgs) -> Host {
    let mut host = Host::detect();
    if let Some(bits) = args.host_bits {
        host.word_width = bits.into();
    }
    if let Some(arch) = args.host_arch {
        host.cpu = arch.into();
    }
    if let Some(target) = &args.target {
        host = host.with_target(target.clone());
    }
    host
}

fn layout_from(args: &ToolArgs) -> Layout {
    let mut layout = Layout::new(&args.root);
    if let Some(dir) = &args.bench_root {
        layout = layout.with_bench_root(dir);
    }
    if let Some(dir) = &args.runtime_dir {
        layout = layout.with_runtime_dir(dir);
    }
    if let Some(dir) = &args.wasm_toolchain {
        layout = layout.with_wasm_toolchain(dir);
    }
    layout
}

/// Everything `run` and `build` need, validated before any work starts.
struct Setup {
    registry: Registry,
    host: Host,
    pipeline: Pipeline,
}

fn prepare(suite: &SuiteArgs, host_args: &HostArgs, tools: &ToolArgs) -> Result<Setup, ConfigError> {
    let registry = load_registry(suite)?;
    let host = host_from(host_args);
    let plan = resolve(&host);
    debug!(%host, variants = plan.variants.len(), "resolved variant plan");

    let layout = layout_from(tools).absolute()?;
    layout.validate()?;

    let selection = ProfileSelection::from_flags(tools.release, tools.debug, tools.tool.clone())?;
    let lowering_tool = selection.resolve(&layout.root, &tools.tool_name)?;

    let mut toolchain = Toolchain::new(&layout, lowering_tool)
        .with_cc(&tools.cc)
        .with_cxx(&tools.cxx)
        .with_target(host.target.clone())
        .with_debug_symbols(!tools.no_debug_symbols)
        .with_timeout(tools.timeout.map(Duration::from_secs));
    if let Some(wasm_cc) = &tools.wasm_cc {
        toolchain = toolchain.with_wasm_cc(wasm_cc);
    }

    let pipeline = Pipeline::new(layout, toolchain.absolute()?, plan).with_jobs(tools.jobs);
    pipeline.validate()?;
    Ok(Setup {
        registry,
        host,
        pipeline,
    })
}
