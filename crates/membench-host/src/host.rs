//! Host characteristics relevant to variant selection.

use std::fmt;
use std::str::FromStr;

use crate::HostError;

/// Native word width of the host (or of a target).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WordWidth {
    Bits32,
    Bits64,
}

impl WordWidth {
    /// Word width of the running binary.
    #[must_use]
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }

    /// Convert a bit count (32 or 64).
    ///
    /// # Errors
    /// Returns an error for any other value.
    pub const fn from_bits(bits: u32) -> Result<Self, HostError> {
        match bits {
            32 => Ok(Self::Bits32),
            64 => Ok(Self::Bits64),
            other => Err(HostError::InvalidWordWidth(other)),
        }
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }
}

impl fmt::Display for WordWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// CPU architecture family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CpuFamily {
    X86,
    Arm,
    Other,
}

impl CpuFamily {
    /// Family of the running binary.
    #[must_use]
    pub fn native() -> Self {
        Self::from_arch_name(std::env::consts::ARCH)
    }

    /// Classify an architecture name (`uname -m` style or a triple's first field).
    ///
    /// Anything mentioning "86" is x86 (`x86`, `x86_64`, `i386`, `i686`).
    #[must_use]
    pub fn from_arch_name(arch: &str) -> Self {
        let arch = arch.to_ascii_lowercase();
        if arch.contains("86") || arch == "amd64" {
            Self::X86
        } else if arch.starts_with("arm") || arch.starts_with("aarch64") || arch.starts_with("thumb")
        {
            Self::Arm
        } else {
            Self::Other
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::Arm => "arm",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for CpuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed compilation target triple (`arch-vendor-os[-env]`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetTriple {
    triple: String,
    arch: String,
}

impl TargetTriple {
    /// The triple as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.triple
    }

    /// Architecture field.
    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    #[must_use]
    pub fn cpu(&self) -> CpuFamily {
        CpuFamily::from_arch_name(&self.arch)
    }

    /// Word width implied by the architecture field.
    #[must_use]
    pub fn word_width(&self) -> WordWidth {
        if self.arch.contains("64") {
            WordWidth::Bits64
        } else {
            WordWidth::Bits32
        }
    }

    /// Bare-metal targets carry `none` as their OS (e.g. `thumbv7em-none-unknown-eabi`).
    #[must_use]
    pub fn is_bare_metal(&self) -> bool {
        self.triple.split('-').skip(1).any(|part| part == "none")
    }

    fn os_matches(&self, host_os: &str) -> bool {
        let triple = self.triple.to_ascii_lowercase();
        match host_os {
            "linux" => triple.contains("linux"),
            "macos" => ["apple", "darwin", "macos"].iter().any(|s| triple.contains(s)),
            "windows" => triple.contains("windows"),
            _ => true,
        }
    }
}

impl FromStr for TargetTriple {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let triple = s.trim();
        let mut parts = triple.split('-');
        let arch = parts.next().unwrap_or_default();
        if arch.is_empty() || parts.next().is_none() {
            return Err(HostError::InvalidTriple(s.to_string()));
        }
        Ok(Self {
            triple: triple.to_string(),
            arch: arch.to_string(),
        })
    }
}

impl fmt::Display for TargetTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple)
    }
}

/// The machine the benchmarks are built (and normally run) on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Host {
    pub word_width: WordWidth,
    pub cpu: CpuFamily,
    /// Architecture name as reported by `std::env::consts::ARCH`.
    pub arch: String,
    /// Operating system name as reported by `std::env::consts::OS`.
    pub os: String,
    /// Explicit compilation target, if cross-compiling.
    pub target: Option<TargetTriple>,
}

impl Host {
    /// Describe a host explicitly.
    #[must_use]
    pub fn new(word_width: WordWidth, cpu: CpuFamily) -> Self {
        let native = std::env::consts::ARCH;
        let arch = if CpuFamily::from_arch_name(native) == cpu {
            native
        } else {
            cpu.as_str()
        };
        Self {
            word_width,
            cpu,
            arch: arch.to_string(),
            os: std::env::consts::OS.to_string(),
            target: None,
        }
    }

    /// Describe the machine this binary runs on.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(WordWidth::native(), CpuFamily::native())
    }

    /// Set an explicit compilation target.
    #[must_use]
    pub fn with_target(mut self, target: TargetTriple) -> Self {
        self.target = Some(target);
        self
    }

    /// Override the architecture name; the CPU family follows it.
    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self.cpu = CpuFamily::from_arch_name(&self.arch);
        self
    }

    /// Override the operating system name.
    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = os.into();
        self
    }

    #[must_use]
    pub const fn is_64_bit(&self) -> bool {
        matches!(self.word_width, WordWidth::Bits64)
    }

    #[must_use]
    pub const fn is_x86(&self) -> bool {
        matches!(self.cpu, CpuFamily::X86)
    }

    #[must_use]
    pub const fn is_32_bit_x86(&self) -> bool {
        !self.is_64_bit() && self.is_x86()
    }

    /// Whether code produced for the configured target can execute here.
    ///
    /// No target means the host itself, which is always runnable.
    #[must_use]
    pub fn target_runnable(&self) -> bool {
        let Some(target) = &self.target else {
            return true;
        };
        let same_cpu = match self.cpu {
            // `riscv64` runs `riscv64gc-*`
            CpuFamily::Other => target
                .arch()
                .to_ascii_lowercase()
                .starts_with(&self.arch.to_ascii_lowercase()),
            family => target.cpu() == family,
        };
        !target.is_bare_metal()
            && same_cpu
            && target.word_width() <= self.word_width
            && target.os_matches(&self.os)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.word_width, self.cpu, self.os)?;
        if let Some(target) = &self.target {
            write!(f, " targeting {target}")?;
        }
        Ok(())
    }
}
