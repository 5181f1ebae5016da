//! Ratio table and its CSV rendering.
//!
//! Every cell is a variant's reduced time divided by the native reduced time
//! of the same program. Columns are fixed per run by the variant plan.

use std::fmt::Write as _;
use std::path::Path;

use membench_host::VariantPlan;

use crate::metrics;
use crate::runner::{Column, ProgramTimings, TimingSample};

/// Default CSV file name, written in the bench root.
pub const DEFAULT_CSV: &str = "benchmarks.csv";

/// Report columns for `plan`: native, then each variant in table order.
#[must_use]
pub fn columns(plan: &VariantPlan) -> Vec<Column> {
    std::iter::once(Column::Native)
        .chain(plan.variants.iter().copied().map(Column::Variant))
        .collect()
}

/// One program's ratios, aligned with the report columns.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportRow {
    pub program: String,
    pub cells: Vec<Option<f64>>,
}

impl ReportRow {
    /// A row with every cell empty.
    #[must_use]
    pub fn unmeasured(program: &str, width: usize) -> Self {
        Self {
            program: program.to_string(),
            cells: vec![None; width],
        }
    }

    #[must_use]
    pub fn is_measured(&self) -> bool {
        self.cells.iter().any(Option::is_some)
    }
}

/// Compute a row from reduced samples.
///
/// Without a usable native sample the row is [`ReportRow::unmeasured`].
/// Durations that are not positive and finite count as missing.
#[must_use]
pub fn build_row(program: &str, columns: &[Column], samples: &[TimingSample]) -> ReportRow {
    let lookup = |column: Column| {
        samples
            .iter()
            .find(|s| s.program == program && s.column == column)
            .map(|s| s.duration_secs)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
    };
    let Some(native) = lookup(Column::Native) else {
        return ReportRow::unmeasured(program, columns.len());
    };
    let cells = columns
        .iter()
        .map(|&column| match column {
            Column::Native => Some(1.0),
            Column::Variant(_) => lookup(column).map(|secs| secs / native),
        })
        .collect();
    ReportRow {
        program: program.to_string(),
        cells,
    }
}

/// The full table, rows in registry order.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    columns: Vec<Column>,
    rows: Vec<ReportRow>,
}

impl Report {
    #[must_use]
    pub const fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append the row for one program's measurements.
    pub fn add_timings(&mut self, timings: &ProgramTimings) -> &ReportRow {
        let row = build_row(&timings.program, &self.columns, &timings.samples);
        for (&column, ratio) in self.columns.iter().zip(&row.cells) {
            if let (Column::Variant(_), Some(ratio)) = (column, ratio) {
                metrics::record_ratio(&row.program, column, *ratio);
            }
        }
        self.rows.push(row);
        &self.rows[self.rows.len() - 1]
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    /// Number of programs with a native baseline.
    #[must_use]
    pub fn measured_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_measured()).count()
    }

    /// Header cells: `Program` then each column label.
    #[must_use]
    pub fn headers(&self) -> Vec<&'static str> {
        std::iter::once("Program")
            .chain(self.columns.iter().map(|c| c.label()))
            .collect()
    }

    /// Render as CSV. Ratios keep full precision; absent cells are empty.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<_> = self.headers().into_iter().map(csv_field).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&csv_field(&row.program));
            for cell in &row.cells {
                out.push(',');
                if let Some(ratio) = cell {
                    out.push_str(&format_ratio(*ratio));
                }
            }
            out.push('\n');
        }
        out
    }

    /// Write the CSV rendering to `path`.
    ///
    /// # Errors
    /// Returns any I/O error from writing the file.
    pub fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }
}

/// Ratio as text; `Debug` keeps full precision and a trailing `.0`.
#[must_use]
pub fn format_ratio(ratio: f64) -> String {
    format!("{ratio:?}")
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Console text for one measurement: `1.2345`, or with a native baseline
/// `1.2345 (12.34% slower)`.
#[must_use]
pub fn format_sample(secs: f64, native: Option<f64>) -> String {
    let secs = round4(secs);
    let mut text = format!("{secs:.4}");
    if let Some(native) = native.map(round4).filter(|n| *n > 0.0) {
        let (pct, direction) = if secs > native {
            ((secs - native) / native * 100.0, "slower")
        } else {
            ((native - secs) / native * 100.0, "faster")
        };
        let _ = write!(text, " ({pct:.2}% {direction})");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use membench_host::{CpuFamily, Host, ProtectionVariant, WordWidth, resolve};

    fn sample(program: &str, column: Column, secs: f64) -> TimingSample {
        TimingSample {
            program: program.to_string(),
            column,
            duration_secs: secs,
        }
    }

    fn bc() -> Column {
        Column::Variant(ProtectionVariant::BoundsChecked)
    }

    fn np() -> Column {
        Column::Variant(ProtectionVariant::NoProtection)
    }

    #[test]
    fn test_columns_follow_plan() {
        let plan = resolve(&Host::new(WordWidth::Bits64, CpuFamily::Other));
        let keys: Vec<_> = columns(&plan).into_iter().map(Column::key).collect();
        assert_eq!(keys, ["native", "np_us", "np", "bc", "vm", "cm"]);
    }

    #[test]
    fn test_native_ratio_is_one() {
        let cols = [Column::Native, np(), bc()];
        let samples = [
            sample("p", Column::Native, 0.4),
            sample("p", np(), 0.5),
            sample("p", bc(), 0.6),
        ];
        let row = build_row("p", &cols, &samples);
        assert_eq!(row.cells[0], Some(1.0));
        assert!((row.cells[1].unwrap() - 1.25).abs() < 1e-12);
        assert!((row.cells[2].unwrap() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_positive_native_is_unmeasured() {
        let cols = [Column::Native, bc()];
        for native in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let samples = [sample("p", Column::Native, native), sample("p", bc(), 0.5)];
            let row = build_row("p", &cols, &samples);
            assert_eq!(row, ReportRow::unmeasured("p", 2), "native = {native}");
        }
    }

    #[test]
    fn test_non_positive_variant_is_dropped() {
        let cols = [Column::Native, np(), bc()];
        let samples = [
            sample("p", Column::Native, 1.0),
            sample("p", np(), 0.0),
            sample("p", bc(), -0.5),
        ];
        let row = build_row("p", &cols, &samples);
        assert_eq!(row.cells, [Some(1.0), None, None]);
    }

    #[test]
    fn test_missing_variant_cell_is_empty() {
        let cols = [Column::Native, np(), bc()];
        let samples = [sample("p", Column::Native, 1.0), sample("p", np(), 2.0)];
        let row = build_row("p", &cols, &samples);
        assert_eq!(row.cells, [Some(1.0), Some(2.0), None]);
    }

    #[test]
    fn test_no_native_is_unmeasured() {
        let cols = [Column::Native, np()];
        let row = build_row("p", &cols, &[sample("p", np(), 2.0)]);
        assert_eq!(row, ReportRow::unmeasured("p", 2));
        assert!(!row.is_measured());
    }

    #[test]
    fn test_csv() {
        let mut report = Report::new(vec![Column::Native, np(), bc()]);
        report.add_timings(&ProgramTimings {
            program: "a".to_string(),
            samples: vec![sample("a", Column::Native, 2.0), sample("a", bc(), 3.0)],
            failures: Vec::new(),
        });
        report.add_timings(&ProgramTimings {
            program: "b,c".to_string(),
            ..ProgramTimings::default()
        });
        assert_eq!(
            report.to_csv(),
            "Program,native,wasm no protection,wasm bounds checked\n\
             a,1.0,,1.5\n\
             \"b,c\",,,\n"
        );
        assert_eq!(report.measured_count(), 1);
    }

    #[test]
    fn test_format_sample() {
        assert_eq!(format_sample(1.23456, None), "1.2346");
        assert_eq!(format_sample(1.5, Some(1.0)), "1.5000 (50.00% slower)");
        assert_eq!(format_sample(0.75, Some(1.0)), "0.7500 (25.00% faster)");
        assert_eq!(format_sample(1.00001, Some(1.0)), "1.0000 (0.00% faster)");
    }
}
