//! Directory layout and external tool configuration.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use membench_host::{ProtectionVariant, TargetTriple};
use tracing::debug;

use crate::command::ToolCommand;
use crate::error::ConfigError;

/// Runtime sources shared by every variant, relative to the runtime dir.
const RUNTIME_SOURCES: &[&str] = &["runtime.c", "libc/libc_backing.c", "libc/env.c"];

/// Default name of the wasm-to-bytecode lowering tool binary.
pub const DEFAULT_TOOL_NAME: &str = "silverfish";

/// Build profile of the lowering tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolProfile {
    Release,
    Debug,
}

impl ToolProfile {
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Debug => "debug",
        }
    }
}

/// How to locate the lowering tool.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ProfileSelection {
    /// `<root>/target/release/<tool>`.
    Release,
    /// `<root>/target/debug/<tool>`.
    Debug,
    /// Whichever profile was built most recently.
    #[default]
    Newest,
    /// A specific binary.
    Explicit(PathBuf),
}

impl ProfileSelection {
    /// Combine the `--release`, `--debug` and `--tool` flags.
    ///
    /// # Errors
    /// Returns an error if both `release` and `debug` are set.
    pub fn from_flags(release: bool, debug: bool, tool: Option<PathBuf>) -> Result<Self, ConfigError> {
        match (release, debug, tool) {
            (true, true, _) => Err(ConfigError::ConflictingProfiles),
            (_, _, Some(path)) => Ok(Self::Explicit(path)),
            (true, false, None) => Ok(Self::Release),
            (false, true, None) => Ok(Self::Debug),
            (false, false, None) => Ok(Self::Newest),
        }
    }

    /// Resolve to an existing binary.
    ///
    /// # Errors
    /// Returns an error if the selected binary does not exist.
    pub fn resolve(&self, root: &Path, tool_name: &str) -> Result<PathBuf, ConfigError> {
        let profile_path = |profile: ToolProfile| {
            root.join("target").join(profile.dir_name()).join(tool_name)
        };
        let path = match self {
            Self::Explicit(path) => path.clone(),
            Self::Release => profile_path(ToolProfile::Release),
            Self::Debug => profile_path(ToolProfile::Debug),
            Self::Newest => {
                let release = profile_path(ToolProfile::Release);
                let debug = profile_path(ToolProfile::Debug);
                match (modified(&release), modified(&debug)) {
                    (None, None) => return Err(ConfigError::NoToolProfile { release, debug }),
                    (Some(r), Some(d)) if d > r => debug,
                    (None, Some(_)) => debug,
                    _ => release,
                }
            }
        };
        if !path.is_file() {
            return Err(ConfigError::ToolNotFound(path));
        }
        let path = absolute_path(&path)?;
        debug!(tool = %path.display(), "resolved lowering tool");
        Ok(path)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Every command runs inside its program directory, so paths handed to it
/// must not be relative to ours.
fn absolute_path(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|source| ConfigError::InvalidPath {
        path: path.to_path_buf(),
        source,
    })
}

/// Bare tool names are left for `PATH` lookup; anything with a directory
/// part is made absolute.
fn absolute_tool(tool: &Path) -> Result<PathBuf, ConfigError> {
    if tool.components().count() > 1 {
        absolute_path(tool)
    } else {
        Ok(tool.to_path_buf())
    }
}

/// Where programs, runtime sources and the wasm toolchain live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Project root; the lowering tool is built under `<root>/target/`.
    pub root: PathBuf,
    /// Directory containing one subdirectory per program.
    pub bench_root: PathBuf,
    /// Runtime sources (`runtime.c`, `libc/`, `memory/`).
    pub runtime_dir: PathBuf,
    /// Wasm toolchain install (`dist/bin/clang`, `sysroot/`).
    pub wasm_toolchain: PathBuf,
}

impl Layout {
    /// Default layout under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            bench_root: root.join("code_benches"),
            runtime_dir: root.join("runtime"),
            wasm_toolchain: root.join("wasmception"),
            root,
        }
    }

    #[must_use]
    pub fn with_bench_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bench_root = dir.into();
        self
    }

    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_wasm_toolchain(mut self, dir: impl Into<PathBuf>) -> Self {
        self.wasm_toolchain = dir.into();
        self
    }

    /// The same layout with every directory made absolute.
    ///
    /// # Errors
    /// Returns an error if the current directory cannot be determined.
    pub fn absolute(self) -> Result<Self, ConfigError> {
        Ok(Self {
            root: absolute_path(&self.root)?,
            bench_root: absolute_path(&self.bench_root)?,
            runtime_dir: absolute_path(&self.runtime_dir)?,
            wasm_toolchain: absolute_path(&self.wasm_toolchain)?,
        })
    }

    /// Runtime sources linked into every executable of `variant`.
    #[must_use]
    pub fn runtime_sources(&self, variant: ProtectionVariant) -> Vec<PathBuf> {
        RUNTIME_SOURCES
            .iter()
            .map(|src| self.runtime_dir.join(src))
            .chain(std::iter::once(
                self.runtime_dir.join("memory").join(variant.runtime_source()),
            ))
            .collect()
    }

    /// Working directory of a program.
    #[must_use]
    pub fn program_dir(&self, name: &str) -> PathBuf {
        self.bench_root.join(name)
    }

    /// Check the directories the pipeline reads from.
    ///
    /// # Errors
    /// Returns the first missing directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for dir in [&self.bench_root, &self.runtime_dir] {
            if !dir.is_dir() {
                return Err(ConfigError::MissingDirectory(dir.clone()));
            }
        }
        Ok(())
    }
}

/// External compilers and the lowering tool used by the pipeline.
#[derive(Clone, Debug)]
pub struct Toolchain {
    /// Native C compiler (also used for variant executables).
    pub cc: String,
    /// Native C++ driver for multi-language programs.
    pub cxx: String,
    /// Wasm-targeting C compiler.
    pub wasm_cc: PathBuf,
    /// Sysroot passed to the wasm compiler.
    pub wasm_sysroot: PathBuf,
    /// Wasm-to-bytecode lowering tool.
    pub lowering_tool: PathBuf,
    /// Explicit target for the lowering tool and the variant compiler.
    pub target: Option<TargetTriple>,
    /// Emit `-g` for native and variant builds.
    pub debug_symbols: bool,
    /// Kill any single build command running longer than this.
    pub timeout: Option<Duration>,
}

impl Toolchain {
    /// Default compilers for `layout` with the given lowering tool.
    pub fn new(layout: &Layout, lowering_tool: impl Into<PathBuf>) -> Self {
        Self {
            cc: "clang".to_string(),
            cxx: "clang++".to_string(),
            wasm_cc: layout.wasm_toolchain.join("dist").join("bin").join("clang"),
            wasm_sysroot: layout.wasm_toolchain.join("sysroot"),
            lowering_tool: lowering_tool.into(),
            target: None,
            debug_symbols: true,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc = cc.into();
        self
    }

    #[must_use]
    pub fn with_cxx(mut self, cxx: impl Into<String>) -> Self {
        self.cxx = cxx.into();
        self
    }

    #[must_use]
    pub fn with_wasm_cc(mut self, wasm_cc: impl Into<PathBuf>) -> Self {
        self.wasm_cc = wasm_cc.into();
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: Option<TargetTriple>) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub const fn with_debug_symbols(mut self, enabled: bool) -> Self {
        self.debug_symbols = enabled;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The same toolchain with every tool path absolute.
    ///
    /// # Errors
    /// Returns an error if the current directory cannot be determined.
    pub fn absolute(self) -> Result<Self, ConfigError> {
        let tool = |name: &str| absolute_tool(Path::new(name)).map(|p| p.to_string_lossy().into_owned());
        Ok(Self {
            cc: tool(&self.cc)?,
            cxx: tool(&self.cxx)?,
            wasm_cc: absolute_tool(&self.wasm_cc)?,
            wasm_sysroot: absolute_path(&self.wasm_sysroot)?,
            lowering_tool: absolute_tool(&self.lowering_tool)?,
            ..self
        })
    }

    /// Check the wasm compiler and its sysroot.
    ///
    /// A bare compiler name is left to `PATH` and not checked here.
    ///
    /// # Errors
    /// Returns the first missing file or directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wasm_cc.components().count() > 1 && !self.wasm_cc.is_file() {
            return Err(ConfigError::MissingFile(self.wasm_cc.clone()));
        }
        if !self.wasm_sysroot.is_dir() {
            return Err(ConfigError::MissingDirectory(self.wasm_sysroot.clone()));
        }
        Ok(())
    }

    /// Native driver for a program.
    #[must_use]
    pub fn native_driver(&self, multi_language: bool) -> &str {
        if multi_language { &self.cxx } else { &self.cc }
    }

    /// First line of `cc --version`, if the compiler runs.
    #[must_use]
    pub fn cc_version(&self) -> Option<String> {
        let output = ToolCommand::new(&self.cc).arg("--version").run().ok()?;
        output.stdout.lines().next().map(|line| line.trim().to_string())
    }
}
