//! membench CLI - memory-protection overhead benchmarks

mod cli;
mod commands;
mod terminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let metrics_handle = if cli.metrics {
        membench::metrics::CliRecorder::new().install()
    } else {
        None
    };
    membench::metrics::init();

    let default_directive = if cli.verbose {
        "membench=debug"
    } else if cli.silent {
        "membench=error"
    } else {
        "membench=info"
    };
    let span_events = if cli.verbose { FmtSpan::CLOSE } else { FmtSpan::NONE };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(default_directive.parse().expect("static directive is valid")),
        )
        .with_target(false)
        .with_span_events(span_events)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = commands::run_command(&cli);

    if let Some(handle) = metrics_handle {
        handle.print_summary();
    }

    std::process::exit(exit_code);
}
