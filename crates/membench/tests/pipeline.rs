//! End-to-end tests: build and benchmark a fake suite.

#![cfg(unix)]

mod common;

use std::path::Path;
use std::process::Command;

use common::FakeProject;
use membench::report::columns;
use membench::{
    Column, CpuFamily, Host, MeasurePolicy, Pipeline, ProgramSpec, ProtectionVariant, Registry,
    Report, StageKind, WordWidth, bench_program, resolve,
};

fn linux_x86_64() -> Host {
    Host::new(WordWidth::Bits64, CpuFamily::X86).with_os("linux")
}

fn bench_all(pipeline: &Pipeline, registry: &Registry) -> Report {
    let builds = pipeline.build_all(registry).expect("build pool");
    let policy = MeasurePolicy::default().with_repeat(2);
    let mut report = Report::new(columns(pipeline.plan()));
    for (program, build) in registry.iter().zip(&builds) {
        let timings = bench_program(program, build, &pipeline.plan().variants, &policy, |_, _| {});
        report.add_timings(&timings);
    }
    report
}

#[test]
fn test_failing_native_and_failing_variant() {
    let _guard = common::serial();
    let project = FakeProject::new(&["-DFAIL_NATIVE", "bin/flaky_bc"]);
    for name in ["ok", "broken", "flaky"] {
        project.add_program(name);
    }
    let registry = Registry::new(vec![
        ProgramSpec::new("ok", 1 << 14),
        ProgramSpec::new("broken", 1 << 14).with_flags(["-DFAIL_NATIVE"]),
        ProgramSpec::new("flaky", 1 << 14),
    ])
    .unwrap();

    let pipeline = Pipeline::new(project.layout(), project.toolchain(), resolve(&linux_x86_64())).with_jobs(2);
    let builds = pipeline.build_all(&registry).unwrap();
    assert!(builds[0].succeeded());
    assert_eq!(builds[1].failed_stages().collect::<Vec<_>>(), [StageKind::NativeExecutable]);
    assert!(builds[1].artifact(StageKind::WasmModule).is_none());
    let bc = ProtectionVariant::BoundsChecked;
    assert_eq!(builds[2].failed_stages().collect::<Vec<_>>(), [StageKind::VariantExecutable(bc)]);
    assert!(builds[2].variant(ProtectionVariant::Mpx).is_some());

    let report = bench_all(&pipeline, &registry);
    let cols = report.columns().to_vec();
    let rows = report.rows();
    assert_eq!(rows.len(), 3);

    // fully built program: every cell present and positive, native exactly 1.0
    assert_eq!(rows[0].program, "ok");
    assert_eq!(rows[0].cells[0], Some(1.0));
    assert!(rows[0].cells.iter().all(|c| c.is_some_and(|r| r > 0.0)));

    // native build failure: empty row
    assert_eq!(rows[1].program, "broken");
    assert!(rows[1].cells.iter().all(Option::is_none));

    // one variant failed: only that cell is empty
    assert_eq!(rows[2].program, "flaky");
    for (column, cell) in cols.iter().zip(&rows[2].cells) {
        if *column == Column::Variant(bc) {
            assert!(cell.is_none());
        } else {
            assert!(cell.is_some_and(|r| r > 0.0), "{column}");
        }
    }
    assert_eq!(rows[2].cells[0], Some(1.0));
    assert_eq!(report.measured_count(), 2);
}

#[test]
fn test_compile_only_stops_after_bytecode() {
    let _guard = common::serial();
    let project = FakeProject::new(&[]);
    project.add_program("p");
    let registry = Registry::new(vec![ProgramSpec::new("p", 1 << 14)]).unwrap();

    let host = linux_x86_64().with_target("thumbv7em-none-unknown-eabi".parse().unwrap());
    let plan = resolve(&host);
    assert!(plan.is_compile_only());

    let toolchain = project.toolchain().with_target(host.target.clone());
    let builds = Pipeline::new(project.layout(), toolchain, plan).build_all(&registry).unwrap();
    let stages: Vec<_> = builds[0].artifacts.iter().map(|a| a.stage).collect();
    assert_eq!(
        stages,
        [StageKind::WasmModule, StageKind::BytecodeChecked, StageKind::BytecodeUnchecked]
    );
    let bin = project.bench_root().join("p/bin");
    assert!(bin.join("p.bc").is_file());
    assert!(bin.join("p_us.bc").is_file());
    assert!(!bin.join("p").exists());
}

#[test]
fn test_missing_sources_isolated_to_program() {
    let _guard = common::serial();
    let project = FakeProject::new(&[]);
    project.add_program("good");
    std::fs::create_dir_all(project.bench_root().join("empty")).unwrap();
    let registry = Registry::new(vec![ProgramSpec::new("empty", 1), ProgramSpec::new("good", 1)]).unwrap();

    let pipeline = Pipeline::new(project.layout(), project.toolchain(), resolve(&linux_x86_64()));
    let builds = pipeline.build_all(&registry).unwrap();
    assert_eq!(builds[0].failed_stages().collect::<Vec<_>>(), [StageKind::Sources]);
    assert!(builds[1].succeeded());
    assert!(builds[1].native().is_some());
}

// ============================================================================
// Binary
// ============================================================================

fn membench(project: &FakeProject, registry: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_membench"));
    cmd.arg("--silent");
    run_args(&mut cmd, project, registry, &project.wasm_cc);
    cmd
}

fn run_args(cmd: &mut Command, project: &FakeProject, registry: &Path, wasm_cc: &Path) {
    cmd.arg("run")
        .arg("--root")
        .arg(project.root())
        .arg("--programs")
        .arg(registry)
        .arg("--cc")
        .arg(&project.cc)
        .arg("--cxx")
        .arg(&project.cc)
        .arg("--wasm-cc")
        .arg(wasm_cc)
        .args(["--release", "-r", "2"]);
}

#[test]
fn test_cli_run_writes_csv() {
    let _guard = common::serial();
    let project = FakeProject::new(&["-DFAIL_NATIVE"]);
    project.add_program("ok");
    project.add_program("broken");
    let registry = project.write_registry(&[
        ProgramSpec::new("ok", 1 << 14),
        ProgramSpec::new("broken", 1 << 14).with_flags(["-DFAIL_NATIVE"]),
    ]);

    let status = membench(&project, &registry).status().unwrap();
    assert!(status.success());

    let csv = std::fs::read_to_string(project.bench_root().join("benchmarks.csv")).unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert!(lines[0].starts_with("Program,native,wasm no protection unsafe,wasm no protection,wasm bounds checked"));
    assert!(lines[1].starts_with("ok,1.0,"));
    assert!(lines[2].starts_with("broken,"));
    assert!(lines[2].trim_start_matches("broken").chars().all(|c| c == ','));
}

#[test]
fn test_cli_compile_only_exits_zero() {
    let _guard = common::serial();
    let project = FakeProject::new(&[]);
    project.add_program("p");
    let registry = project.write_registry(&[ProgramSpec::new("p", 1 << 14)]);

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_membench"));
    run_args(&mut cmd, &project, &registry, &project.wasm_cc);
    let output = cmd
        .args(["--target", "thumbv7em-none-unknown-eabi"])
        .env_remove("RUST_LOG")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("compile-only mode"), "{stderr}");
    assert!(!project.bench_root().join("benchmarks.csv").exists());
    assert!(project.bench_root().join("p/bin/p.bc").is_file());
}

#[test]
fn test_cli_relative_root() {
    let _guard = common::serial();
    let project = FakeProject::new(&[]);
    project.add_program("ok");
    project.write_registry(&[ProgramSpec::new("ok", 1 << 14)]);

    let status = Command::new(env!("CARGO_BIN_EXE_membench"))
        .current_dir(project.root())
        .args(["--silent", "run", "--root", ".", "--programs", "programs.toml"])
        .args(["--cc", "./tools/cc", "--cxx", "./tools/cc", "--wasm-cc", "./tools/wasm-cc"])
        .args(["--release", "-r", "2"])
        .status()
        .unwrap();
    assert!(status.success());

    let csv = std::fs::read_to_string(project.bench_root().join("benchmarks.csv")).unwrap();
    let row = csv.lines().nth(1).unwrap();
    assert!(row.starts_with("ok,1.0,"), "{row}");
    assert!(row.split(',').skip(1).all(|cell| !cell.is_empty()), "{row}");
}

#[test]
fn test_cli_missing_wasm_compiler_is_config_error() {
    let _guard = common::serial();
    let project = FakeProject::new(&[]);
    project.add_program("ok");
    let registry = project.write_registry(&[ProgramSpec::new("ok", 1 << 14)]);

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_membench"));
    cmd.arg("--silent");
    run_args(&mut cmd, &project, &registry, Path::new("/nonexistent/wasm/clang"));
    let status = cmd.status().unwrap();
    assert_eq!(status.code(), Some(1));
    assert!(!project.bench_root().join("benchmarks.csv").exists());
    assert!(!project.bench_root().join("ok/bin").exists());
}

#[test]
fn test_cli_missing_runtime_source_is_config_error() {
    let _guard = common::serial();
    let project = FakeProject::new(&[]);
    project.add_program("ok");
    let registry = project.write_registry(&[ProgramSpec::new("ok", 1 << 14)]);
    std::fs::remove_file(project.root().join("runtime/memory/cortex_m.c")).unwrap();

    let status = membench(&project, &registry).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_cli_no_baseline_fails() {
    let _guard = common::serial();
    let project = FakeProject::new(&["-DFAIL_NATIVE"]);
    project.add_program("broken");
    let registry = project.write_registry(&[ProgramSpec::new("broken", 1).with_flags(["-DFAIL_NATIVE"])]);

    let status = membench(&project, &registry).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_cli_missing_tool_is_config_error() {
    let _guard = common::serial();
    let project = FakeProject::new(&[]);
    let registry = project.write_registry(&[ProgramSpec::new("p", 1)]);

    let status = Command::new(env!("CARGO_BIN_EXE_membench"))
        .args(["--silent", "build", "--root"])
        .arg(project.root())
        .arg("--programs")
        .arg(&registry)
        .arg("--debug")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
