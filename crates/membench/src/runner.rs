//! Benchmark runner: repeated wall-clock timing of built executables.
//!
//! Runs happen strictly one at a time across the whole process. Every
//! measurement holds [`BENCH_LOCK`] for all of its repetitions.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use membench_host::ProtectionVariant;
use parking_lot::{Mutex, const_mutex};
use tracing::{debug, info_span, warn};

use crate::command::{Streams, ToolCommand};
use crate::error::MeasureError;
use crate::metrics;
use crate::pipeline::ProgramBuild;
use crate::registry::ProgramSpec;

/// Default number of runs per measurement.
pub const RUN_COUNT: usize = 10;

/// Serialises measurements process-wide.
static BENCH_LOCK: Mutex<()> = const_mutex(());

/// How repeated samples are collapsed into one duration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reduction {
    /// Fastest run; least sensitive to scheduling noise.
    #[default]
    Min,
    Median,
    Mean,
}

impl Reduction {
    /// Reduce `samples`; `None` if there are none.
    #[must_use]
    pub fn reduce(self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let value = match self {
            Self::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Self::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    f64::midpoint(sorted[mid - 1], sorted[mid])
                } else {
                    sorted[mid]
                }
            }
        };
        Some(value)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Median => "median",
            Self::Mean => "mean",
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repetition and reduction settings for one measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeasurePolicy {
    pub repeat: usize,
    pub reduction: Reduction,
    /// Kill a single run after this long.
    pub timeout: Option<Duration>,
}

impl Default for MeasurePolicy {
    fn default() -> Self {
        Self {
            repeat: RUN_COUNT,
            reduction: Reduction::default(),
            timeout: None,
        }
    }
}

impl MeasurePolicy {
    #[must_use]
    pub const fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    #[must_use]
    pub const fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Call `run` `repeat` times under the global lock and reduce the samples.
///
/// # Errors
/// Propagates the first failing run, and rejects a reduced value that is
/// not positive and finite.
pub fn measure_with<F>(repeat: usize, reduction: Reduction, mut run: F) -> Result<f64, MeasureError>
where
    F: FnMut() -> Result<f64, MeasureError>,
{
    let _guard = BENCH_LOCK.lock();
    let mut samples = Vec::with_capacity(repeat);
    for _ in 0..repeat {
        samples.push(run()?);
    }
    let value = reduction.reduce(&samples).ok_or(MeasureError::NoSamples)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(MeasureError::InvalidDuration(value));
    }
    Ok(value)
}

/// Time `executable` run with `args` in `dir`.
///
/// Output is discarded; only the exit status and elapsed time matter.
///
/// # Errors
/// Fails if the executable is missing, any run exits non-zero or times
/// out, or the reduced duration is invalid.
pub fn measure(executable: &Path, args: &[String], dir: &Path, policy: &MeasurePolicy) -> Result<f64, MeasureError> {
    if !executable.is_file() {
        return Err(MeasureError::Missing(executable.to_path_buf()));
    }
    let command = ToolCommand::new(executable)
        .args(args)
        .current_dir(dir)
        .streams(Streams::Discard)
        .timeout(policy.timeout);

    measure_with(policy.repeat, policy.reduction, || {
        let secs = command.run()?.elapsed.as_secs_f64();
        metrics::record_run_duration(secs);
        Ok(secs)
    })
}

/// A report column: the native baseline or one variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    Native,
    Variant(ProtectionVariant),
}

impl Column {
    /// Short key (`native` or a variant id).
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Variant(variant) => variant.id(),
        }
    }

    /// Header text.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Variant(variant) => variant.label(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One reduced duration.
#[derive(Clone, Debug, PartialEq)]
pub struct TimingSample {
    pub program: String,
    pub column: Column,
    pub duration_secs: f64,
}

/// Everything measured for one program.
#[derive(Debug, Default)]
pub struct ProgramTimings {
    pub program: String,
    /// Successful measurements, native first.
    pub samples: Vec<TimingSample>,
    pub failures: Vec<(Column, MeasureError)>,
}

impl ProgramTimings {
    #[must_use]
    pub fn get(&self, column: Column) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| s.column == column)
            .map(|s| s.duration_secs)
    }

    #[must_use]
    pub fn native(&self) -> Option<f64> {
        self.get(Column::Native)
    }
}

/// Measure one built program: native first, then `variants` in order.
///
/// Variants are skipped when the native baseline is unavailable, and
/// individually when their executable was not built. `observe` sees every
/// attempted measurement as it completes.
pub fn bench_program<F>(
    program: &ProgramSpec,
    build: &ProgramBuild,
    variants: &[ProtectionVariant],
    policy: &MeasurePolicy,
    mut observe: F,
) -> ProgramTimings
where
    F: FnMut(Column, &Result<f64, MeasureError>),
{
    let _span = info_span!("bench", program = %program.name).entered();
    let mut timings = ProgramTimings {
        program: program.name.clone(),
        ..ProgramTimings::default()
    };

    let Some(native) = build.native() else {
        debug!(program = %program.name, "no native executable; skipping");
        return timings;
    };

    let mut targets = vec![(Column::Native, native.path.as_path())];
    for &variant in variants {
        if let Some(artifact) = build.variant(variant) {
            targets.push((Column::Variant(variant), artifact.path.as_path()));
        }
    }

    for (column, path) in targets {
        let result = measure(path, &program.run_args, &build.dir, policy);
        observe(column, &result);
        match result {
            Ok(duration_secs) => {
                metrics::record_measurement(&program.name, column, duration_secs);
                timings.samples.push(TimingSample {
                    program: program.name.clone(),
                    column,
                    duration_secs,
                });
            }
            Err(err) => {
                warn!(program = %program.name, %column, "{err}");
                let native_failed = column == Column::Native;
                timings.failures.push((column, err));
                if native_failed {
                    break;
                }
            }
        }
    }
    timings
}
