//! Which variants to build and time on a host.

use crate::{Host, ProtectionVariant};

/// How far the build pipeline goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// Native, wasm, bytecode and variant executables, then timing.
    Full,
    /// Stop after the bytecode stage. Set when the configured target cannot
    /// run on the build host; nothing is lowered to native code or timed.
    CompileOnly,
}

/// Variant selection for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantPlan {
    pub mode: BuildMode,
    /// Variants to lower, measure and report, in table order.
    /// Empty in compile-only mode.
    pub variants: Vec<ProtectionVariant>,
}

impl VariantPlan {
    #[must_use]
    pub fn is_compile_only(&self) -> bool {
        self.mode == BuildMode::CompileOnly
    }

    #[must_use]
    pub fn includes(&self, variant: ProtectionVariant) -> bool {
        self.variants.contains(&variant)
    }
}

/// Variants whose applicability predicate holds on `host`, in table order.
#[must_use]
pub fn applicable_variants(host: &Host) -> Vec<ProtectionVariant> {
    ProtectionVariant::all()
        .filter(|variant| variant.applies_to(host))
        .collect()
}

/// Compute the build mode and the variant set for `host`.
///
/// The variant set fixes the report columns for the whole run.
#[must_use]
pub fn resolve(host: &Host) -> VariantPlan {
    if host.target_runnable() {
        VariantPlan {
            mode: BuildMode::Full,
            variants: applicable_variants(host),
        }
    } else {
        VariantPlan {
            mode: BuildMode::CompileOnly,
            variants: Vec::new(),
        }
    }
}
