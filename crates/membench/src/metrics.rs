//! Metrics collection using metrics-rs.
//!
//! Library code records through the `metrics` macros. The binary installs
//! [`CliRecorder`] with `--metrics` and prints a summary on exit.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;

use crate::pipeline::StageKind;
use crate::runner::Column;

// ============================================================================
// Metric descriptions
// ============================================================================

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "membench_stages_succeeded_total",
        Unit::Count,
        "Build stages that produced their artifact"
    );
    describe_counter!(
        "membench_stages_failed_total",
        Unit::Count,
        "Build stages that failed"
    );
    describe_gauge!(
        "membench_time_seconds",
        Unit::Seconds,
        "Reduced wall-clock time per program and column"
    );
    describe_gauge!(
        "membench_ratio",
        Unit::Count,
        "Variant time / native time"
    );
    describe_histogram!(
        "membench_run_duration_seconds",
        Unit::Seconds,
        "Duration of every individual benchmark run"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

/// Count one finished build stage.
pub fn record_stage(stage: StageKind, ok: bool) {
    let labels = [("stage", stage.as_str().to_string())];
    if ok {
        counter!("membench_stages_succeeded_total", &labels).increment(1);
    } else {
        counter!("membench_stages_failed_total", &labels).increment(1);
    }
}

/// Record a single timed run.
pub fn record_run_duration(secs: f64) {
    histogram!("membench_run_duration_seconds").record(secs);
}

/// Record a reduced measurement.
pub fn record_measurement(program: &str, column: Column, secs: f64) {
    let labels = [
        ("program", program.to_string()),
        ("column", column.key().to_string()),
    ];
    gauge!("membench_time_seconds", &labels).set(secs);
}

/// Record a variant's ratio against native.
pub fn record_ratio(program: &str, column: Column, ratio: f64) {
    let labels = [
        ("program", program.to_string()),
        ("column", column.key().to_string()),
    ];
    gauge!("membench_ratio", &labels).set(ratio);
}

// ============================================================================
// In-memory recorder
// ============================================================================

#[derive(Default)]
struct Storage {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
}

/// Metric handle bound to one rendered key.
struct Slot {
    key: String,
    storage: Arc<Storage>,
}

impl metrics::CounterFn for Slot {
    fn increment(&self, value: u64) {
        *self.storage.counters.write().entry(self.key.clone()).or_insert(0) += value;
    }

    fn absolute(&self, value: u64) {
        self.storage.counters.write().insert(self.key.clone(), value);
    }
}

impl metrics::GaugeFn for Slot {
    fn increment(&self, value: f64) {
        *self.storage.gauges.write().entry(self.key.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        *self.storage.gauges.write().entry(self.key.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.storage.gauges.write().insert(self.key.clone(), value);
    }
}

impl metrics::HistogramFn for Slot {
    fn record(&self, value: f64) {
        self.storage
            .histograms
            .write()
            .entry(self.key.clone())
            .or_default()
            .push(value);
    }
}

/// Recorder keeping every metric in memory for a terminal summary.
#[derive(Default)]
pub struct CliRecorder {
    storage: Arc<Storage>,
}

impl CliRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the global recorder. `None` if one is already installed.
    #[must_use]
    pub fn install(self) -> Option<CliRecorderHandle> {
        let storage = Arc::clone(&self.storage);
        metrics::set_global_recorder(self).ok()?;
        Some(CliRecorderHandle { storage })
    }

    fn slot(&self, key: &Key) -> Arc<Slot> {
        Arc::new(Slot {
            key: key_to_string(key),
            storage: Arc::clone(&self.storage),
        })
    }
}

/// `name{label=value,...}`
fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.slot(key))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.slot(key))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.slot(key))
    }
}

/// Read access to what an installed [`CliRecorder`] collected.
pub struct CliRecorderHandle {
    storage: Arc<Storage>,
}

impl CliRecorderHandle {
    #[must_use]
    pub fn counter(&self, key: &str) -> Option<u64> {
        self.storage.counters.read().get(key).copied()
    }

    #[must_use]
    pub fn gauge(&self, key: &str) -> Option<f64> {
        self.storage.gauges.read().get(key).copied()
    }

    /// Render all metrics, keys sorted within each section.
    #[must_use]
    pub fn summary(&self) -> String {
        render_summary(&self.storage)
    }

    pub fn print_summary(&self) {
        print!("{}", self.summary());
    }
}

fn sorted<V>(map: &HashMap<String, V>) -> Vec<(&String, &V)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn render_summary(storage: &Storage) -> String {
    use std::fmt::Write as _;

    let counters = storage.counters.read();
    let gauges = storage.gauges.read();
    let histograms = storage.histograms.read();
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        return "No metrics collected.\n".to_string();
    }

    let mut out = String::from("\n## Metrics Summary\n\n");
    if !counters.is_empty() {
        out.push_str("### Counters\n");
        for (key, value) in sorted(&counters) {
            let _ = writeln!(out, "  {key}: {value}");
        }
        out.push('\n');
    }
    if !gauges.is_empty() {
        out.push_str("### Gauges\n");
        for (key, value) in sorted(&gauges) {
            let _ = writeln!(out, "  {key}: {value:.6}");
        }
        out.push('\n');
    }
    if !histograms.is_empty() {
        out.push_str("### Histograms\n");
        for (key, values) in sorted(&histograms) {
            if values.is_empty() {
                continue;
            }
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            let _ = writeln!(
                out,
                "  {key}: count={}, min={min:.6}, max={max:.6}, avg={avg:.6}",
                values.len()
            );
        }
        out.push('\n');
    }
    out
}
