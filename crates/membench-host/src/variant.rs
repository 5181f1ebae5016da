//! Memory-protection variants.
//!
//! All per-variant knowledge lives in [`VARIANTS`]. Adding a variant means
//! adding an enum member and one table row.

use std::fmt;

use crate::Host;

/// A memory-protection strategy a wasm module can be lowered with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtectionVariant {
    /// No protection, lowered from the unchecked bytecode.
    NoProtectionUnsafe,
    /// No protection, lowered from the checked bytecode.
    NoProtection,
    /// Software bounds checks on every access.
    BoundsChecked,
    /// Intel MPX hardware bounds registers.
    Mpx,
    /// Guard pages in a reserved 64-bit address range.
    VirtualMemory,
    /// x86 segment registers.
    Segmentation,
    /// Cortex-M style constrained memory. Does not depend on host
    /// capabilities, so it is always buildable.
    CortexM,
}

/// Which bytecode artifact a variant is lowered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BytecodeFlavor {
    /// Safety checks retained.
    Checked,
    /// Lowered with `-u`, bounds/type checks elided.
    Unchecked,
}

/// Static description of one variant.
#[derive(Debug)]
pub struct VariantInfo {
    pub variant: ProtectionVariant,
    /// Short name used in artifact file names (`bin/<prog>_<id>`).
    pub id: &'static str,
    /// Report column header.
    pub label: &'static str,
    /// Memory implementation under `<runtime>/memory/`.
    pub runtime_source: &'static str,
    pub bytecode: BytecodeFlavor,
    /// Whether the variant can be built on the host.
    pub applies: fn(&Host) -> bool,
}

const fn always(_: &Host) -> bool {
    true
}

const fn x86_only(host: &Host) -> bool {
    host.is_x86()
}

const fn bits64_only(host: &Host) -> bool {
    host.is_64_bit()
}

const fn x86_32_only(host: &Host) -> bool {
    host.is_32_bit_x86()
}

/// Every known variant, in measurement and report-column order.
pub const VARIANTS: &[VariantInfo] = &[
    VariantInfo {
        variant: ProtectionVariant::NoProtectionUnsafe,
        id: "np_us",
        label: "wasm no protection unsafe",
        runtime_source: "no_protection.c",
        bytecode: BytecodeFlavor::Unchecked,
        applies: always,
    },
    VariantInfo {
        variant: ProtectionVariant::NoProtection,
        id: "np",
        label: "wasm no protection",
        runtime_source: "no_protection.c",
        bytecode: BytecodeFlavor::Checked,
        applies: always,
    },
    VariantInfo {
        variant: ProtectionVariant::BoundsChecked,
        id: "bc",
        label: "wasm bounds checked",
        runtime_source: "generic.c",
        bytecode: BytecodeFlavor::Checked,
        applies: always,
    },
    VariantInfo {
        variant: ProtectionVariant::Mpx,
        id: "mpx",
        label: "wasm mpx",
        runtime_source: "mpx.c",
        bytecode: BytecodeFlavor::Checked,
        applies: x86_only,
    },
    VariantInfo {
        variant: ProtectionVariant::VirtualMemory,
        id: "vm",
        label: "wasm virtual memory",
        runtime_source: "64bit_nix.c",
        bytecode: BytecodeFlavor::Checked,
        applies: bits64_only,
    },
    VariantInfo {
        variant: ProtectionVariant::Segmentation,
        id: "sm",
        label: "wasm segmentation",
        runtime_source: "segmented.c",
        bytecode: BytecodeFlavor::Checked,
        applies: x86_32_only,
    },
    VariantInfo {
        variant: ProtectionVariant::CortexM,
        id: "cm",
        label: "wasm cortex-m",
        runtime_source: "cortex_m.c",
        bytecode: BytecodeFlavor::Checked,
        applies: always,
    },
];

impl ProtectionVariant {
    /// Table entry for this variant.
    #[must_use]
    pub fn info(self) -> &'static VariantInfo {
        // Table rows are declared in enum order.
        &VARIANTS[self as usize]
    }

    #[must_use]
    pub fn id(self) -> &'static str {
        self.info().id
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        self.info().label
    }

    #[must_use]
    pub fn runtime_source(self) -> &'static str {
        self.info().runtime_source
    }

    #[must_use]
    pub fn bytecode(self) -> BytecodeFlavor {
        self.info().bytecode
    }

    /// Whether this variant can be built on `host`.
    #[must_use]
    pub fn applies_to(self, host: &Host) -> bool {
        (self.info().applies)(host)
    }

    /// Iterate all variants in table order.
    pub fn all() -> impl Iterator<Item = Self> {
        VARIANTS.iter().map(|info| info.variant)
    }
}

impl fmt::Display for ProtectionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_enum_order() {
        for (index, info) in VARIANTS.iter().enumerate() {
            assert_eq!(info.variant as usize, index, "row {} out of order", info.id);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<_> = VARIANTS.iter().map(|info| info.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), VARIANTS.len());
    }

    #[test]
    fn test_only_unsafe_reference_uses_unchecked_bytecode() {
        let unchecked: Vec<_> = ProtectionVariant::all()
            .filter(|v| v.bytecode() == BytecodeFlavor::Unchecked)
            .collect();
        assert_eq!(unchecked, vec![ProtectionVariant::NoProtectionUnsafe]);
    }
}
