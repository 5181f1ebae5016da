//! Program registry - the benchmark suite definition.
//!
//! Programs live at `<bench-root>/<name>/` and are built from the sources
//! found there. The registry is constructed once at startup and passed to
//! every stage; it is never mutated afterwards.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default execution stack reserved in the wasm module (16 KiB).
pub const DEFAULT_STACK_SIZE: u32 = 1 << 14;

/// One benchmark program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramSpec {
    /// Unique name; also the program's directory under the bench root.
    pub name: String,
    /// Arguments passed to every built executable.
    #[serde(default, rename = "args")]
    pub run_args: Vec<String>,
    /// Stack reservation in bytes for the wasm module.
    #[serde(default = "default_stack_size")]
    pub stack_size: u32,
    /// Extra compiler flags for the native and wasm builds.
    #[serde(default, rename = "flags")]
    pub extra_flags: Vec<String>,
    /// Build with `-flto`.
    #[serde(default = "default_true", rename = "lto")]
    pub uses_lto: bool,
    /// Sources may include C++ files; native build uses the C++ driver.
    #[serde(default)]
    pub multi_language: bool,
}

const fn default_stack_size() -> u32 {
    DEFAULT_STACK_SIZE
}

const fn default_true() -> bool {
    true
}

impl ProgramSpec {
    /// Create a C-only program with no arguments, LTO enabled.
    pub fn new(name: impl Into<String>, stack_size: u32) -> Self {
        Self {
            name: name.into(),
            run_args: Vec::new(),
            stack_size,
            extra_flags: Vec::new(),
            uses_lto: true,
            multi_language: false,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_lto(mut self, enabled: bool) -> Self {
        self.uses_lto = enabled;
        self
    }

    #[must_use]
    pub const fn with_multi_language(mut self, enabled: bool) -> Self {
        self.multi_language = enabled;
        self
    }

    /// File extensions that count as sources for this program.
    #[must_use]
    pub fn source_extensions(&self) -> &'static [&'static str] {
        if self.multi_language {
            &["c", "cc", "cpp"]
        } else {
            &["c"]
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidProgram {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.name == "." || self.name == ".." || self.name.contains(['/', '\\']) {
            return Err(invalid("name must be a single path segment"));
        }
        if self.stack_size == 0 {
            return Err(invalid("stack size must be positive"));
        }
        Ok(())
    }
}

impl fmt::Display for ProgramSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.run_args.join(" "))
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default, rename = "program")]
    programs: Vec<ProgramSpec>,
}

/// Ordered, validated set of programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    programs: Vec<ProgramSpec>,
}

impl Registry {
    /// Build a registry, rejecting invalid or duplicate programs.
    ///
    /// # Errors
    /// Returns a configuration error for the first invalid program.
    pub fn new(programs: Vec<ProgramSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for program in &programs {
            program.validate()?;
            if !seen.insert(program.name.as_str()) {
                return Err(ConfigError::DuplicateProgram(program.name.clone()));
            }
        }
        Ok(Self { programs })
    }

    /// The standard suite: custom kernels plus PolyBench/C.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            programs: builtin_programs(),
        }
    }

    /// Parse a TOML registry (`[[program]]` tables).
    ///
    /// # Errors
    /// Returns a configuration error if the text is not a valid registry.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: RegistryFile = toml::from_str(text).map_err(|e| ConfigError::RegistryParse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::new(file.programs)
    }

    /// Load a TOML registry from disk.
    ///
    /// # Errors
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::RegistryRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Keep only the named programs, in registry order.
    ///
    /// # Errors
    /// Returns an error if a name is not in the registry.
    pub fn retain_named(&self, names: &[String]) -> Result<Self, ConfigError> {
        if let Some(missing) = names.iter().find(|name| self.find(name).is_none()) {
            return Err(ConfigError::UnknownProgram(missing.clone()));
        }
        let programs = self
            .programs
            .iter()
            .filter(|p| names.contains(&p.name))
            .cloned()
            .collect();
        Ok(Self { programs })
    }

    /// Find a program by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ProgramSpec> {
        self.programs.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn programs(&self) -> &[ProgramSpec] {
        &self.programs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProgramSpec> {
        self.programs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a ProgramSpec;
    type IntoIter = std::slice::Iter<'a, ProgramSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.programs.iter()
    }
}

fn polybench(name: &str) -> ProgramSpec {
    ProgramSpec::new(name, 1 << 15)
}

// Apps (nn, pid, tiny_ekf, tinycrypt, v9) and MiBench are not part of the
// default suite; they need local include paths or input files. Use a
// registry file to run them.
fn builtin_programs() -> Vec<ProgramSpec> {
    vec![
        // Custom benchmarks
        ProgramSpec::new("custom_binarytrees", 1 << 14).with_args(["16"]),
        ProgramSpec::new("custom_function_pointers", 1 << 14),
        ProgramSpec::new("custom_libjpeg", 1 << 15).with_flags([
            "-Wno-incompatible-library-redeclaration",
            "-Wno-implicit-function-declaration",
            "-Wno-shift-negative-value",
        ]),
        ProgramSpec::new("custom_matrix_multiply", 1 << 14),
        ProgramSpec::new("custom_memcmp", 1 << 14),
        ProgramSpec::new("custom_sqlite", 1 << 15).with_flags(["-DSQLITE_MUTEX_NOOP", "-ldl"]),
        // PolyBench/C
        polybench("pb_datamining_correlation"),
        polybench("pb_datamining_covariance"),
        polybench("pb_la_blas_gemm"),
        polybench("pb_la_blas_gemver"),
        polybench("pb_la_blas_gesummv"),
        polybench("pb_la_blas_symm"),
        polybench("pb_la_blas_syr2k"),
        polybench("pb_la_blas_syrk"),
        polybench("pb_la_blas_trmm"),
        polybench("pb_la_kernels_2mm"),
        polybench("pb_la_kernels_3mm"),
        polybench("pb_la_kernels_atax"),
        polybench("pb_la_kernels_bicg"),
        polybench("pb_la_kernels_doitgen"),
        polybench("pb_la_kernels_mvt"),
        polybench("pb_la_solvers_cholesky"),
        polybench("pb_la_solvers_durbin"),
        polybench("pb_la_solvers_gramschmidt"),
        polybench("pb_la_solvers_lu"),
        polybench("pb_la_solvers_ludcmp"),
        polybench("pb_la_solvers_trisolv"),
        polybench("pb_medely_deriche"),
        polybench("pb_medely_floyd_warshall"),
        polybench("pb_medely_nussinov"),
        polybench("pb_stencils_adi"),
        polybench("pb_stencils_fdtd_2d"),
        polybench("pb_stencils_heat_3d"),
        polybench("pb_stencils_jacobi_1d"),
        polybench("pb_stencils_jacobi_2d"),
        polybench("pb_stencils_seidel_2d"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_valid() {
        let builtin = Registry::builtin();
        let rebuilt = Registry::new(builtin.programs().to_vec()).unwrap();
        assert_eq!(rebuilt, builtin);
        assert_eq!(builtin.programs()[0].name, "custom_binarytrees");
        assert_eq!(builtin.find("custom_binarytrees").unwrap().run_args, ["16"]);
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [[program]]
            name = "app_pid"
            args = ["-x", "1"]
            stack_size = 256
            flags = ["-std=c++11", "-Wall"]
            multi_language = true

            [[program]]
            name = "app_v9"
            stack_size = 262144
            lto = false
        "#;
        let registry = Registry::from_toml_str(text, Path::new("programs.toml")).unwrap();
        assert_eq!(registry.len(), 2);

        let pid = registry.find("app_pid").unwrap();
        assert_eq!(pid.run_args, ["-x", "1"]);
        assert_eq!(pid.stack_size, 256);
        assert!(pid.uses_lto);
        assert!(pid.multi_language);
        assert_eq!(pid.source_extensions(), &["c", "cc", "cpp"]);

        let v9 = registry.find("app_v9").unwrap();
        assert!(!v9.uses_lto);
        assert!(v9.extra_flags.is_empty());
    }

    #[test]
    fn test_default_stack_size() {
        let text = "[[program]]\nname = \"x\"\n";
        let registry = Registry::from_toml_str(text, Path::new("p.toml")).unwrap();
        assert_eq!(registry.programs()[0].stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = Registry::new(vec![ProgramSpec::new("a", 1), ProgramSpec::new("a", 2)]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProgram(name) if name == "a"));
    }

    #[test]
    fn test_rejects_bad_names_and_stack() {
        for name in ["", "..", "a/b"] {
            assert!(Registry::new(vec![ProgramSpec::new(name, 1)]).is_err(), "{name:?}");
        }
        assert!(Registry::new(vec![ProgramSpec::new("ok", 0)]).is_err());
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let text = "[[program]]\nname = \"x\"\nbogus = 1\n";
        let err = Registry::from_toml_str(text, Path::new("p.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::RegistryParse { .. }));
    }

    #[test]
    fn test_retain_named_keeps_registry_order() {
        let registry = Registry::builtin();
        let names = vec!["pb_la_blas_gemm".to_string(), "custom_memcmp".to_string()];
        let subset = registry.retain_named(&names).unwrap();
        let kept: Vec<_> = subset.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(kept, ["custom_memcmp", "pb_la_blas_gemm"]);

        assert!(registry.retain_named(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_display() {
        let p = ProgramSpec::new("custom_binarytrees", 1).with_args(["16"]);
        assert_eq!(p.to_string(), "custom_binarytrees(16)");
    }
}
