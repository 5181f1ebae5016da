//! Build command: run the compilation pipeline over the suite.

use membench::{Pipeline, ProgramBuild, Registry};
use tracing::error;

use super::prepare;
use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, HostArgs, SuiteArgs, ToolArgs};
use crate::terminal::{self, Progress};

/// One line per finished program.
fn describe(build: &ProgramBuild) -> String {
    let failed: Vec<String> = build.failed_stages().map(|stage| stage.to_string()).collect();
    if failed.is_empty() {
        build.program.clone()
    } else {
        format!("{} ({} failed)", build.program, failed.join(", "))
    }
}

/// Build every program with a progress bar, returning results in registry order.
pub fn build_suite(registry: &Registry, pipeline: &Pipeline) -> membench::Result<Vec<ProgramBuild>> {
    let progress = Progress::new(registry.len() as u64, "Building");
    let builds = pipeline.build_all_with(registry, |build| {
        progress.println(terminal::status_line(build.succeeded(), &describe(build)));
        progress.inc();
    });
    progress.finish();
    builds
}

pub fn cmd_build(suite: &SuiteArgs, host: &HostArgs, tools: &ToolArgs) -> i32 {
    let setup = match prepare(suite, host, tools) {
        Ok(setup) => setup,
        Err(err) => {
            error!("{err}");
            terminal::error(&err.to_string());
            return EXIT_FAILURE;
        }
    };

    terminal::info(&format!("Host: {}", setup.host));
    let builds = match build_suite(&setup.registry, &setup.pipeline) {
        Ok(builds) => builds,
        Err(err) => {
            terminal::error(&err.to_string());
            return EXIT_FAILURE;
        }
    };

    let complete = builds.iter().filter(|b| b.succeeded()).count();
    let summary = format!("Built {complete}/{} programs without failures", builds.len());
    if complete == builds.len() {
        terminal::success(&summary);
    } else {
        terminal::warning(&summary);
    }
    if setup.pipeline.plan().is_compile_only() {
        terminal::info("Compile-only mode: stopped after bytecode");
    }
    EXIT_SUCCESS
}
