use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::StageKind;

/// Top-level errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Measure(#[from] MeasureError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start build workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Invalid setup detected before any work starts. Never recovered.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--release and --debug are mutually exclusive")]
    ConflictingProfiles,
    #[error("lowering tool not found at {}", .0.display())]
    ToolNotFound(PathBuf),
    #[error("no build of the lowering tool found (looked for {} and {})", .release.display(), .debug.display())]
    NoToolProfile { release: PathBuf, debug: PathBuf },
    #[error("directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("cannot resolve path {}: {source}", .path.display())]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read program registry {}: {source}", .path.display())]
    RegistryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid program registry {}: {message}", .path.display())]
    RegistryParse { path: PathBuf, message: String },
    #[error("duplicate program name '{0}'")]
    DuplicateProgram(String),
    #[error("invalid program '{name}': {reason}")]
    InvalidProgram { name: String, reason: String },
    #[error("unknown program '{0}'")]
    UnknownProgram(String),
    #[error("invalid host description: {0}")]
    Host(#[from] membench_host::HostError),
}

/// An external command did not complete successfully.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed ({status}): {}", first_line(.stderr))]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("`{command}` timed out after {}s", .timeout.as_secs_f64())]
    TimedOut { command: String, timeout: Duration },
}

impl CommandError {
    /// Command line of the failing invocation.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::Spawn { command, .. }
            | Self::Exit { command, .. }
            | Self::TimedOut { command, .. } => command,
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no error output")
}

/// A build stage failed for one program.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{program}: no sources found in {}", .dir.display())]
    NoSources { program: String, dir: PathBuf },
    #[error("{program}: cannot prepare {}: {source}", .path.display())]
    Io {
        program: String,
        stage: StageKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{program}: {stage} stage failed: {source}")]
    Stage {
        program: String,
        stage: StageKind,
        #[source]
        source: CommandError,
    },
}

impl BuildError {
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            Self::NoSources { program, .. }
            | Self::Io { program, .. }
            | Self::Stage { program, .. } => program,
        }
    }

    /// Stage that failed.
    #[must_use]
    pub const fn stage(&self) -> StageKind {
        match self {
            Self::NoSources { .. } => StageKind::Sources,
            Self::Io { stage, .. } | Self::Stage { stage, .. } => *stage,
        }
    }
    /// Command line of the failing tool, when a tool ran.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Stage { source, .. } => Some(source.command()),
            Self::NoSources { .. } | Self::Io { .. } => None,
        }
    }
}

/// A single (program, column) measurement could not be trusted.
#[derive(Error, Debug)]
pub enum MeasureError {
    #[error("executable not found: {}", .0.display())]
    Missing(PathBuf),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("invalid duration {0} (must be positive and finite)")]
    InvalidDuration(f64),
    #[error("no samples collected")]
    NoSamples,
}
