//! Markdown report: system information followed by the ratio table.

use std::fmt::Write as _;
use std::path::Path;

use membench::{MeasurePolicy, Report, Toolchain, ToolCommand};

use crate::terminal::Table;

// ============================================================================
// System information collection
// ============================================================================

/// First stdout line of a command that succeeded.
fn first_line_of(command: ToolCommand) -> Option<String> {
    let output = command.run().ok()?;
    output
        .stdout
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}

/// System information for the report header, most relevant first.
fn collect_system_info(toolchain: &Toolchain) -> Vec<(&'static str, String)> {
    let mut info = Vec::new();

    let arch = first_line_of(ToolCommand::new("uname").arg("-m"))
        .unwrap_or_else(|| std::env::consts::ARCH.to_string());
    info.push(("Architecture", arch));

    if let Some(model) = cpu_model() {
        info.push(("CPU", model));
    }
    if let Some(version) = toolchain.cc_version() {
        info.push(("Compiler", version));
    }
    if let Some(os) = os_name() {
        info.push(("OS", os));
    }
    if let Some(date) = first_line_of(ToolCommand::new("date").arg("+%Y-%m-%d %H:%M:%S")) {
        info.push(("Date", date));
    }
    info
}

fn cpu_model() -> Option<String> {
    if let Ok(contents) = std::fs::read_to_string("/proc/cpuinfo") {
        // x86 reports "model name", some arm kernels "Model" or "Hardware"
        for prefix in ["model name", "Model", "Hardware"] {
            if let Some(value) = contents
                .lines()
                .filter(|line| line.starts_with(prefix))
                .find_map(|line| line.split(':').nth(1))
            {
                return Some(value.trim().to_string());
            }
        }
    }
    first_line_of(ToolCommand::new("sysctl").args(["-n", "machdep.cpu.brand_string"]))
        .or_else(|| first_line_of(ToolCommand::new("sysctl").args(["-n", "hw.model"])))
}

fn os_name() -> Option<String> {
    let contents = std::fs::read_to_string("/etc/os-release").ok()?;
    contents
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|name| name.trim_matches('"').to_string())
}

// ============================================================================
// Rendering
// ============================================================================

/// Ratio table with three decimals and empty absent cells.
pub fn ratio_table(report: &Report) -> Table {
    let mut table = Table::new(report.headers());
    for row in report.rows() {
        let mut cells = vec![row.program.clone()];
        cells.extend(
            row.cells
                .iter()
                .map(|cell| cell.map(|ratio| format!("{ratio:.3}")).unwrap_or_default()),
        );
        table.add_row(cells);
    }
    table
}

fn render_markdown(report: &Report, policy: &MeasurePolicy, system_info: &[(&str, String)]) -> String {
    let mut out = String::from("# Memory Protection Benchmarks\n\n## System Information\n\n");

    let mut info = Table::new(["Property", "Value"]);
    for (key, value) in system_info {
        info.add_row(vec![(*key).to_string(), value.clone()]);
    }
    out.push_str(&info.render());

    let _ = write!(
        out,
        "\n## Results\n\n*time relative to native | runs: {} | reduction: {}*\n\n",
        policy.repeat, policy.reduction
    );
    out.push_str(&ratio_table(report).render());
    out
}

/// Write the markdown report to `path`.
pub fn write_markdown(
    path: &Path,
    report: &Report,
    policy: &MeasurePolicy,
    toolchain: &Toolchain,
) -> std::io::Result<()> {
    let system_info = collect_system_info(toolchain);
    std::fs::write(path, render_markdown(report, policy, &system_info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use membench::{Column, ProgramTimings, ProtectionVariant, TimingSample};

    #[test]
    fn test_render_markdown() {
        let bc = Column::Variant(ProtectionVariant::BoundsChecked);
        let mut report = Report::new(vec![Column::Native, bc]);
        report.add_timings(&ProgramTimings {
            program: "custom_memcmp".to_string(),
            samples: vec![
                TimingSample {
                    program: "custom_memcmp".to_string(),
                    column: Column::Native,
                    duration_secs: 0.5,
                },
                TimingSample {
                    program: "custom_memcmp".to_string(),
                    column: bc,
                    duration_secs: 0.75,
                },
            ],
            failures: Vec::new(),
        });

        let text = render_markdown(
            &report,
            &MeasurePolicy::default(),
            &[("Architecture", "x86_64".to_string())],
        );
        assert!(text.starts_with("# Memory Protection Benchmarks\n"));
        assert!(text.contains("| Architecture | x86_64 |"));
        assert!(text.contains("runs: 10 | reduction: min"));
        let row = text.lines().find(|l| l.starts_with("| custom_memcmp")).unwrap();
        let cells: Vec<_> = row.split('|').map(str::trim).collect();
        assert_eq!(cells, ["", "custom_memcmp", "1.000", "1.500", ""]);
    }
}
