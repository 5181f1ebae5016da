//! Run command: build, benchmark, report.

use membench::report::{DEFAULT_CSV, columns, format_sample};
use membench::{Column, MeasurePolicy, Report, bench_program};
use tracing::{error, info};

use super::build::build_suite;
use super::{prepare, report};
use crate::cli::{BenchArgs, EXIT_FAILURE, EXIT_SUCCESS, HostArgs, SuiteArgs, ToolArgs};
use crate::terminal::{self, Spinner};

pub fn cmd_run(suite: &SuiteArgs, host: &HostArgs, tools: &ToolArgs, bench: &BenchArgs) -> i32 {
    let setup = match prepare(suite, host, tools) {
        Ok(setup) => setup,
        Err(err) => {
            error!("{err}");
            terminal::error(&err.to_string());
            return EXIT_FAILURE;
        }
    };
    let pipeline = &setup.pipeline;
    let plan = pipeline.plan();

    terminal::info(&format!("Host: {}", setup.host));
    let builds = match build_suite(&setup.registry, pipeline) {
        Ok(builds) => builds,
        Err(err) => {
            terminal::error(&err.to_string());
            return EXIT_FAILURE;
        }
    };

    if plan.is_compile_only() {
        info!("compile-only mode: nothing is benchmarked");
        terminal::info("Compile-only mode: stopped after bytecode, nothing benchmarked");
        return EXIT_SUCCESS;
    }

    let policy = MeasurePolicy::default()
        .with_repeat(bench.runs as usize)
        .with_reduction(bench.reduction.into())
        .with_timeout(pipeline.toolchain().timeout);

    let mut report = Report::new(columns(plan));
    for (program, build) in setup.registry.iter().zip(&builds) {
        let spinner = Spinner::new(format!("Benchmarking {program}"));
        let mut native = None;
        let timings = bench_program(program, build, &plan.variants, &policy, |column, result| {
            let line = match result {
                Ok(secs) => {
                    let text = format_sample(*secs, native);
                    if column == Column::Native {
                        native = Some(*secs);
                    }
                    format!("  {:<28} {text}", column.label())
                }
                Err(err) => format!("  {:<28} failed: {err}", column.label()),
            };
            spinner.println(line);
        });

        if timings.native().is_some() {
            spinner.finish_with_success(&program.name);
        } else {
            spinner.finish_with_failure(&format!("{}: no native baseline", program.name));
        }
        report.add_timings(&timings);
    }

    let csv_path = bench
        .csv
        .clone()
        .unwrap_or_else(|| pipeline.layout().bench_root.join(DEFAULT_CSV));
    if let Err(err) = report.write_csv(&csv_path) {
        terminal::error(&format!("Failed to write {}: {err}", csv_path.display()));
        return EXIT_FAILURE;
    }
    terminal::success("Results written");
    terminal::path_output(&csv_path);

    if let Some(path) = &bench.markdown {
        if let Err(err) = report::write_markdown(path, &report, &policy, pipeline.toolchain()) {
            terminal::error(&format!("Failed to write {}: {err}", path.display()));
            return EXIT_FAILURE;
        }
        terminal::path_output(path);
    }

    println!();
    report::ratio_table(&report).print();

    if !setup.registry.is_empty() && report.measured_count() == 0 {
        terminal::error("No program produced a native baseline");
        return EXIT_FAILURE;
    }
    EXIT_SUCCESS
}
