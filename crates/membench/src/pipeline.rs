//! Per-program compilation pipeline.
//!
//! Each program is built in its own directory with outputs under `bin/`:
//!
//! ```text
//! sources ──► native executable
//!         └─► wasm module ──► checked bytecode   ──► variant executables
//!                         └─► unchecked bytecode ──┘
//! ```
//!
//! A failure before the variant stage aborts the rest of that program. A
//! failing variant only drops that variant. Programs never affect each other.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use membench_host::{BytecodeFlavor, ProtectionVariant, VariantPlan};
use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use crate::command::ToolCommand;
use crate::error::{BuildError, ConfigError, Result};
use crate::metrics;
use crate::registry::{ProgramSpec, Registry};
use crate::toolchain::{Layout, Toolchain};

/// Output directory inside each program directory.
pub const BIN_DIR: &str = "bin";

/// Wasm compiler target.
const WASM_TARGET: &str = "--target=wasm32-unknown-unknown-wasm";

/// No-op marker translation unit shared by all programs, relative to the
/// program directory.
const DUMMY_SOURCE: &str = "../dummy.c";

/// A pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Sources,
    NativeExecutable,
    WasmModule,
    BytecodeChecked,
    BytecodeUnchecked,
    VariantExecutable(ProtectionVariant),
}

impl StageKind {
    /// Bytecode stage producing `flavor`.
    #[must_use]
    pub const fn bytecode(flavor: BytecodeFlavor) -> Self {
        match flavor {
            BytecodeFlavor::Checked => Self::BytecodeChecked,
            BytecodeFlavor::Unchecked => Self::BytecodeUnchecked,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sources => "sources",
            Self::NativeExecutable => "native",
            Self::WasmModule => "wasm",
            Self::BytecodeChecked => "bytecode",
            Self::BytecodeUnchecked => "bytecode-unchecked",
            Self::VariantExecutable(_) => "variant",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VariantExecutable(variant) => write!(f, "variant {variant}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A file produced by a successful stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildArtifact {
    pub program: String,
    pub stage: StageKind,
    pub path: PathBuf,
}

/// Outcome of building one program.
#[derive(Debug)]
pub struct ProgramBuild {
    pub program: String,
    /// Program working directory.
    pub dir: PathBuf,
    /// Artifacts in the order they were produced.
    pub artifacts: Vec<BuildArtifact>,
    /// Failed stages. An aborted program has exactly one.
    pub failures: Vec<BuildError>,
}

impl ProgramBuild {
    fn new(program: &str, dir: PathBuf) -> Self {
        Self {
            program: program.to_string(),
            dir,
            artifacts: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn push(&mut self, stage: StageKind, path: PathBuf) {
        self.artifacts.push(BuildArtifact {
            program: self.program.clone(),
            stage,
            path,
        });
    }

    #[must_use]
    pub fn artifact(&self, stage: StageKind) -> Option<&BuildArtifact> {
        self.artifacts.iter().find(|a| a.stage == stage)
    }

    #[must_use]
    pub fn native(&self) -> Option<&BuildArtifact> {
        self.artifact(StageKind::NativeExecutable)
    }

    /// Executable for `variant`, if it was built.
    #[must_use]
    pub fn variant(&self, variant: ProtectionVariant) -> Option<&BuildArtifact> {
        self.artifact(StageKind::VariantExecutable(variant))
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// Stages that failed, in the order they failed.
    pub fn failed_stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.failures.iter().map(BuildError::stage)
    }
}

/// Builds every program of a registry for one variant plan.
#[derive(Clone, Debug)]
pub struct Pipeline {
    layout: Layout,
    toolchain: Toolchain,
    plan: VariantPlan,
    jobs: usize,
}

impl Pipeline {
    pub const fn new(layout: Layout, toolchain: Toolchain, plan: VariantPlan) -> Self {
        Self {
            layout,
            toolchain,
            plan,
            jobs: 0,
        }
    }

    /// Worker threads; 0 uses one per CPU.
    #[must_use]
    pub const fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub const fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    #[must_use]
    pub const fn plan(&self) -> &VariantPlan {
        &self.plan
    }

    /// Check everything the planned stages read before building anything.
    ///
    /// # Errors
    /// Returns the first missing directory, compiler or runtime source.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.layout.validate()?;
        self.toolchain.validate()?;
        for &variant in &self.plan.variants {
            if let Some(missing) = self.layout.runtime_sources(variant).into_iter().find(|p| !p.is_file()) {
                return Err(ConfigError::MissingFile(missing));
            }
        }
        Ok(())
    }

    fn job_count(&self) -> usize {
        if self.jobs == 0 { num_cpus::get() } else { self.jobs }
    }

    /// Build every program, results in registry order.
    ///
    /// # Errors
    /// Only fails if the worker pool cannot be created; build failures are
    /// recorded in the returned [`ProgramBuild`]s.
    pub fn build_all(&self, registry: &Registry) -> Result<Vec<ProgramBuild>> {
        self.build_all_with(registry, |_| {})
    }

    /// Like [`Self::build_all`], calling `on_done` as each program finishes.
    ///
    /// # Errors
    /// Only fails if the worker pool cannot be created.
    pub fn build_all_with<F>(&self, registry: &Registry, on_done: F) -> Result<Vec<ProgramBuild>>
    where
        F: Fn(&ProgramBuild) + Sync,
    {
        let jobs = self.job_count();
        if self.plan.is_compile_only() {
            info!("target cannot run on this host; compile-only mode (native and variant stages skipped)");
        }
        debug!(jobs, programs = registry.len(), "building");

        let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
        let builds: Vec<ProgramBuild> = pool.install(|| {
            registry
                .programs()
                .par_iter()
                .map(|program| {
                    let build = self.build_program(program);
                    on_done(&build);
                    build
                })
                .collect()
        });
        Ok(builds)
    }

    /// Run every applicable stage for one program.
    #[must_use]
    pub fn build_program(&self, program: &ProgramSpec) -> ProgramBuild {
        let _span = info_span!("build", program = %program.name).entered();
        let dir = self.layout.program_dir(&program.name);
        let mut build = ProgramBuild::new(&program.name, dir.clone());

        if let Err(err) = self.build_front(program, &dir, &mut build) {
            warn!(
                program = %program.name,
                stage = %err.stage(),
                command = err.command().unwrap_or_default(),
                "{err}"
            );
            metrics::record_stage(err.stage(), false);
            build.failures.push(err);
            return build;
        }

        if self.plan.is_compile_only() {
            return build;
        }

        let results: Vec<_> = self
            .plan
            .variants
            .par_iter()
            .map(|&variant| (variant, self.build_variant(program, &dir, variant)))
            .collect();
        for (variant, result) in results {
            let stage = StageKind::VariantExecutable(variant);
            match result {
                Ok(path) => {
                    metrics::record_stage(stage, true);
                    build.push(stage, path);
                }
                Err(err) => {
                    warn!(
                        program = %program.name,
                        %variant,
                        command = err.command().unwrap_or_default(),
                        "{err}"
                    );
                    metrics::record_stage(stage, false);
                    build.failures.push(err);
                }
            }
        }
        build
    }

    /// Stages whose failure aborts the program: sources, native, wasm, bytecode.
    fn build_front(
        &self,
        program: &ProgramSpec,
        dir: &Path,
        build: &mut ProgramBuild,
    ) -> std::result::Result<(), BuildError> {
        let sources = discover_sources(program, dir)?;
        let bin = dir.join(BIN_DIR);
        std::fs::create_dir_all(&bin).map_err(|source| BuildError::Io {
            program: program.name.clone(),
            stage: StageKind::Sources,
            path: bin.clone(),
            source,
        })?;

        let output = |stage: StageKind| output_name(&program.name, stage);
        let mut steps = Vec::with_capacity(4);
        if !self.plan.is_compile_only() {
            let stage = StageKind::NativeExecutable;
            steps.push((stage, self.native_command(program, &sources, &output(stage))));
        }
        let stage = StageKind::WasmModule;
        steps.push((stage, self.wasm_command(program, &sources, &output(stage))));
        for flavor in [BytecodeFlavor::Checked, BytecodeFlavor::Unchecked] {
            let stage = StageKind::bytecode(flavor);
            steps.push((stage, self.bytecode_command(program, flavor, &output(stage))));
        }

        for (stage, command) in steps {
            let path = dir.join(output(stage));
            self.run_stage(program, stage, command.current_dir(dir), &path)?;
            metrics::record_stage(stage, true);
            build.push(stage, path);
        }
        Ok(())
    }

    fn build_variant(
        &self,
        program: &ProgramSpec,
        dir: &Path,
        variant: ProtectionVariant,
    ) -> std::result::Result<PathBuf, BuildError> {
        let stage = StageKind::VariantExecutable(variant);
        let output = output_name(&program.name, stage);
        let command = self.variant_command(program, variant, &output).current_dir(dir);
        let path = dir.join(&output);
        self.run_stage(program, stage, command, &path)?;
        Ok(path)
    }

    fn run_stage(
        &self,
        program: &ProgramSpec,
        stage: StageKind,
        command: ToolCommand,
        output: &Path,
    ) -> std::result::Result<(), BuildError> {
        let _span = info_span!("stage", stage = %stage).entered();
        remove_stale(output).map_err(|source| BuildError::Io {
            program: program.name.clone(),
            stage,
            path: output.to_path_buf(),
            source,
        })?;
        command
            .timeout(self.toolchain.timeout)
            .run()
            .map(|_| ())
            .map_err(|source| BuildError::Stage {
                program: program.name.clone(),
                stage,
                source,
            })
    }

    /// `<cc|c++> <flags> -lm -O3 [-flto] [-g] <sources> -o bin/<name>`
    #[must_use]
    pub fn native_command(&self, program: &ProgramSpec, sources: &[String], output: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.toolchain.native_driver(program.multi_language))
            .args(&program.extra_flags)
            .args(["-lm", "-O3"]);
        if program.uses_lto {
            cmd = cmd.arg("-flto");
        }
        if self.toolchain.debug_symbols {
            cmd = cmd.arg("-g");
        }
        cmd.args(sources).args(["-o", output])
    }

    /// Compile sources plus the shared marker file to a wasm module.
    #[must_use]
    pub fn wasm_command(&self, program: &ProgramSpec, sources: &[String], output: &str) -> ToolCommand {
        let linker = format!(
            "-Wl,--allow-undefined,-z,stack-size={},--no-threads,--stack-first,--no-entry,--export-all,--export=main,--export=dummy",
            program.stack_size
        );
        let mut sysroot = OsString::from("--sysroot=");
        sysroot.push(&self.toolchain.wasm_sysroot);

        ToolCommand::new(&self.toolchain.wasm_cc)
            .arg(linker)
            .args([WASM_TARGET, "-nostartfiles", "-O3", "-flto"])
            .arg(sysroot)
            .args(&program.extra_flags)
            .arg(DUMMY_SOURCE)
            .args(sources)
            .args(["-o", output])
    }

    /// `<tool> [--target T] [-u] bin/<name>.wasm -o <output>`
    #[must_use]
    pub fn bytecode_command(&self, program: &ProgramSpec, flavor: BytecodeFlavor, output: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.toolchain.lowering_tool);
        if let Some(target) = &self.toolchain.target {
            cmd = cmd.args(["--target", target.as_str()]);
        }
        if flavor == BytecodeFlavor::Unchecked {
            cmd = cmd.arg("-u");
        }
        cmd.arg(output_name(&program.name, StageKind::WasmModule))
            .args(["-o", output])
    }

    /// Link a variant's bytecode with the runtime and its memory implementation.
    #[must_use]
    pub fn variant_command(&self, program: &ProgramSpec, variant: ProtectionVariant, output: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.toolchain.cc).arg("-lm");
        if let Some(target) = &self.toolchain.target {
            cmd = cmd.args(["-target", target.as_str()]);
        }
        cmd = cmd.arg("-O3");
        if program.uses_lto {
            cmd = cmd.arg("-flto");
        }
        if self.toolchain.debug_symbols {
            cmd = cmd.arg("-g");
        }
        cmd.arg(output_name(&program.name, StageKind::bytecode(variant.bytecode())))
            .args(self.layout.runtime_sources(variant))
            .args(["-o", output])
    }
}

/// Output path of `stage`, relative to the program directory.
#[must_use]
pub fn output_name(program: &str, stage: StageKind) -> String {
    match stage {
        StageKind::Sources => String::new(),
        StageKind::NativeExecutable => format!("{BIN_DIR}/{program}"),
        StageKind::WasmModule => format!("{BIN_DIR}/{program}.wasm"),
        StageKind::BytecodeChecked => format!("{BIN_DIR}/{program}.bc"),
        StageKind::BytecodeUnchecked => format!("{BIN_DIR}/{program}_us.bc"),
        StageKind::VariantExecutable(variant) => format!("{BIN_DIR}/{program}_{}", variant.id()),
    }
}

/// Source files of `program`, sorted, relative to `dir`.
///
/// # Errors
/// Fails if the directory cannot be read or holds no sources.
pub fn discover_sources(program: &ProgramSpec, dir: &Path) -> std::result::Result<Vec<String>, BuildError> {
    let entries = std::fs::read_dir(dir).map_err(|source| BuildError::Io {
        program: program.name.clone(),
        stage: StageKind::Sources,
        path: dir.to_path_buf(),
        source,
    })?;
    let extensions = program.source_extensions();
    let mut sources: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.contains(&ext))
        })
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(String::from))
        .collect();
    sources.sort();

    if sources.is_empty() {
        return Err(BuildError::NoSources {
            program: program.name.clone(),
            dir: dir.to_path_buf(),
        });
    }
    Ok(sources)
}

fn remove_stale(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use membench_host::{BuildMode, CpuFamily, Host, WordWidth, resolve};

    fn args(cmd: &ToolCommand) -> Vec<String> {
        cmd.get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn pipeline(target: Option<&str>) -> Pipeline {
        let layout = Layout::new("/w");
        let target = target.map(|t| t.parse().unwrap());
        let toolchain = Toolchain::new(&layout, "/w/target/release/silverfish").with_target(target);
        let plan = resolve(&Host::new(WordWidth::Bits64, CpuFamily::X86));
        Pipeline::new(layout, toolchain, plan)
    }

    #[test]
    fn test_native_command() {
        let program = ProgramSpec::new("custom_sqlite", 1 << 15).with_flags(["-DSQLITE_MUTEX_NOOP", "-ldl"]);
        let sources = vec!["main.c".to_string(), "sqlite3.c".to_string()];
        let cmd = pipeline(None).native_command(&program, &sources, "bin/custom_sqlite");
        assert_eq!(cmd.program(), "clang");
        assert_eq!(
            args(&cmd),
            [
                "-DSQLITE_MUTEX_NOOP", "-ldl", "-lm", "-O3", "-flto", "-g", "main.c", "sqlite3.c", "-o",
                "bin/custom_sqlite"
            ]
        );
    }

    #[test]
    fn test_native_command_without_lto_uses_cxx() {
        let program = ProgramSpec::new("app", 1).with_lto(false).with_multi_language(true);
        let cmd = pipeline(None).native_command(&program, &["a.cpp".to_string()], "bin/app");
        assert_eq!(cmd.program(), "clang++");
        assert!(!args(&cmd).contains(&"-flto".to_string()));
    }

    #[test]
    fn test_wasm_command() {
        let program = ProgramSpec::new("p", 4096);
        let cmd = pipeline(None).wasm_command(&program, &["p.c".to_string()], "bin/p.wasm");
        assert_eq!(cmd.program(), "/w/wasmception/dist/bin/clang");
        let args = args(&cmd);
        assert!(args[0].contains("stack-size=4096,"));
        assert!(args[0].ends_with("--export=main,--export=dummy"));
        assert!(args.contains(&"--sysroot=/w/wasmception/sysroot".to_string()));
        assert_eq!(&args[args.len() - 4..], ["../dummy.c", "p.c", "-o", "bin/p.wasm"]);
    }

    #[test]
    fn test_bytecode_commands() {
        let program = ProgramSpec::new("p", 1);
        let p = pipeline(Some("x86_64-pc-linux-gnu"));
        let checked = p.bytecode_command(&program, BytecodeFlavor::Checked, "bin/p.bc");
        assert_eq!(args(&checked), ["--target", "x86_64-pc-linux-gnu", "bin/p.wasm", "-o", "bin/p.bc"]);

        let unchecked = pipeline(None).bytecode_command(&program, BytecodeFlavor::Unchecked, "bin/p_us.bc");
        assert_eq!(args(&unchecked), ["-u", "bin/p.wasm", "-o", "bin/p_us.bc"]);
    }

    #[test]
    fn test_variant_command_uses_flavored_bytecode() {
        let program = ProgramSpec::new("p", 1);
        let p = pipeline(None);
        let unsafe_cmd = p.variant_command(&program, ProtectionVariant::NoProtectionUnsafe, "bin/p_np_us");
        let unsafe_args = args(&unsafe_cmd);
        assert_eq!(&unsafe_args[..4], ["-lm", "-O3", "-flto", "-g"]);
        assert_eq!(unsafe_args[4], "bin/p_us.bc");
        assert_eq!(unsafe_args[8], "/w/runtime/memory/no_protection.c");

        let vm = p.variant_command(&program, ProtectionVariant::VirtualMemory, "bin/p_vm");
        let vm_args = args(&vm);
        assert!(vm_args.contains(&"bin/p.bc".to_string()));
        assert!(vm_args.contains(&"/w/runtime/memory/64bit_nix.c".to_string()));
    }

    #[test]
    fn test_variant_command_with_target() {
        let program = ProgramSpec::new("p", 1);
        let cmd = pipeline(Some("x86_64-pc-linux-gnu")).variant_command(&program, ProtectionVariant::Mpx, "bin/p_mpx");
        assert_eq!(&args(&cmd)[..3], ["-lm", "-target", "x86_64-pc-linux-gnu"]);
    }

    #[test]
    fn test_output_names() {
        assert_eq!(output_name("p", StageKind::NativeExecutable), "bin/p");
        assert_eq!(output_name("p", StageKind::BytecodeUnchecked), "bin/p_us.bc");
        assert_eq!(
            output_name("p", StageKind::VariantExecutable(ProtectionVariant::Segmentation)),
            "bin/p_sm"
        );
    }

    #[test]
    fn test_discover_sources_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.c", "a.c", "c.cpp", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let c_only = ProgramSpec::new("p", 1);
        assert_eq!(discover_sources(&c_only, dir.path()).unwrap(), ["a.c", "b.c"]);

        let mixed = ProgramSpec::new("p", 1).with_multi_language(true);
        assert_eq!(discover_sources(&mixed, dir.path()).unwrap(), ["a.c", "b.c", "c.cpp"]);
    }

    #[test]
    fn test_no_sources() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_sources(&ProgramSpec::new("p", 1), dir.path()).unwrap_err();
        assert!(matches!(err, BuildError::NoSources { .. }));
        assert_eq!(err.stage(), StageKind::Sources);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(StageKind::WasmModule.to_string(), "wasm");
        assert_eq!(
            StageKind::VariantExecutable(ProtectionVariant::BoundsChecked).to_string(),
            "variant bc"
        );
        assert_eq!(pipeline(None).plan().mode, BuildMode::Full);
    }
}
