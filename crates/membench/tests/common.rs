//! Fake project layout with shell-script compilers.
//!
//! Every fake tool writes a runnable `exit 0` script to its `-o` argument,
//! and fails instead when its command line matches one of the patterns it
//! was created with.

#![cfg(unix)]
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use membench::{Layout, ProgramSpec, Toolchain};
use tempfile::TempDir;

pub const TOOL_NAME: &str = "silverfish";

/// Serialise tests that write and then execute scripts, so no other test
/// thread forks while a script is still open for writing.
pub fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FakeProject {
    pub dir: TempDir,
    pub cc: PathBuf,
    pub wasm_cc: PathBuf,
    pub tool: PathBuf,
}

impl FakeProject {
    /// A project whose native/variant compiler fails on `cc_fail_on`.
    pub fn new(cc_fail_on: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();

        for sub in ["code_benches", "runtime/libc", "runtime/memory", "tools", "wasmception/sysroot"] {
            std::fs::create_dir_all(root.join(sub)).expect("create layout");
        }
        std::fs::write(root.join("code_benches/dummy.c"), "void dummy(void) {}\n").expect("dummy.c");
        for src in [
            "runtime.c",
            "libc/libc_backing.c",
            "libc/env.c",
            "memory/no_protection.c",
            "memory/generic.c",
            "memory/mpx.c",
            "memory/64bit_nix.c",
            "memory/segmented.c",
            "memory/cortex_m.c",
        ] {
            std::fs::write(root.join("runtime").join(src), "").expect("runtime source");
        }

        let cc = root.join("tools/cc");
        let wasm_cc = root.join("tools/wasm-cc");
        let tool = root.join("target/release").join(TOOL_NAME);
        write_fake_tool(&cc, cc_fail_on);
        write_fake_tool(&wasm_cc, &[]);
        write_fake_tool(&tool, &[]);

        Self {
            dir,
            cc,
            wasm_cc,
            tool,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn bench_root(&self) -> PathBuf {
        self.root().join("code_benches")
    }

    /// Create `<bench-root>/<name>/main.c`.
    pub fn add_program(&self, name: &str) {
        let dir = self.bench_root().join(name);
        std::fs::create_dir_all(&dir).expect("program dir");
        std::fs::write(dir.join("main.c"), "int main(void) { return 0; }\n").expect("main.c");
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.root())
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::new(&self.layout(), &self.tool)
            .with_cc(self.cc.to_string_lossy())
            .with_cxx(self.cc.to_string_lossy())
            .with_wasm_cc(&self.wasm_cc)
    }

    /// Write a registry file for `programs` and return its path.
    pub fn write_registry(&self, programs: &[ProgramSpec]) -> PathBuf {
        let mut text = String::new();
        for program in programs {
            text.push_str("[[program]]\n");
            text.push_str(&format!("name = \"{}\"\n", program.name));
            text.push_str(&format!("stack_size = {}\n", program.stack_size));
            let flags: Vec<String> = program.extra_flags.iter().map(|f| format!("\"{f}\"")).collect();
            text.push_str(&format!("flags = [{}]\n\n", flags.join(", ")));
        }
        let path = self.root().join("programs.toml");
        std::fs::write(&path, text).expect("registry file");
        path
    }
}

fn write_fake_tool(path: &Path, fail_on: &[&str]) {
    let patterns = if fail_on.is_empty() {
        "__never_matches__".to_string()
    } else {
        fail_on
            .iter()
            .map(|p| format!("*{p}*"))
            .collect::<Vec<_>>()
            .join("|")
    };
    let script = format!(
        r#"#!/bin/sh
case "$*" in
  {patterns}) echo "fake compiler error: $*" >&2; exit 1;;
esac
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
[ -n "$out" ] || exit 0
printf '#!/bin/sh\nexit 0\n' > "$out"
chmod +x "$out"
"#
    );
    std::fs::create_dir_all(path.parent().expect("tool dir")).expect("tool dir");
    std::fs::write(path, script).expect("write fake tool");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
}
