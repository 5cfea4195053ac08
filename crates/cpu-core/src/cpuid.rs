//! Processor identity model consulted by the `CPUID` instruction.
//!
//! The host installs a vendor string and a small per-leaf table once at
//! configuration time; identity queries during execution read the table
//! verbatim, with no leaf synthesis beyond the vendor/max-leaf packing of
//! leaf zero. The per-leaf `level` field is opaque metadata carried for
//! the host's benefit; the core never interprets it.

use thiserror::Error;

/// Number of bytes in the packed vendor-identification string.
pub const VENDOR_ID_BYTES: usize = 12;
/// Number of configurable identity leaves.
pub const CPUID_LEAF_COUNT: usize = 2;

/// Configurable identity leaves, indexed by the `EAX` selector that
/// queries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum CpuidLeaf {
    /// The standard feature leaf (`EAX=1`).
    Basic1 = 0,
    /// The extended-range leaf (`EAX=0x8000_0000`).
    Extended80000000 = 1,
}

impl CpuidLeaf {
    /// Ordered list of all configurable leaves.
    pub const ALL: [Self; CPUID_LEAF_COUNT] = [Self::Basic1, Self::Extended80000000];

    /// Returns the table index for this leaf.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Maps an `EAX` selector to its configurable leaf, if any.
    #[must_use]
    pub const fn from_selector(selector: u32) -> Option<Self> {
        match selector {
            1 => Some(Self::Basic1),
            0x8000_0000 => Some(Self::Extended80000000),
            _ => None,
        }
    }
}

/// Output record for one identity leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuidLevelInfo {
    /// Value returned in `EAX`.
    pub eax: u32,
    /// Value returned in `EBX`.
    pub ebx: u32,
    /// Value returned in `ECX`.
    pub ecx: u32,
    /// Value returned in `EDX`.
    pub edx: u32,
    /// Opaque per-leaf metadata (highest valid sub-leaf or presence
    /// marker, by host convention). Stored and returned verbatim.
    pub level: u32,
}

/// Host-supplied identity configuration, installed once per context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuidConfig {
    /// Vendor-identification string, at most twelve ASCII bytes.
    pub vendor: String,
    /// Maximum standard leaf reported by leaf zero.
    pub level: u32,
    /// Per-leaf output records, indexed by [`CpuidLeaf`].
    pub leaves: [CpuidLevelInfo; CPUID_LEAF_COUNT],
}

/// Structural validation failures for an identity configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CpuidConfigError {
    /// The vendor string is empty.
    #[error("vendor string is empty")]
    EmptyVendor,
    /// The vendor string does not fit the twelve-byte identity field.
    #[error("vendor string exceeds twelve bytes")]
    VendorTooLong,
    /// The vendor string contains non-ASCII bytes.
    #[error("vendor string contains non-ascii bytes")]
    NonAsciiVendor,
}

/// Register values produced by one identity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuidResult {
    /// `EAX` output.
    pub eax: u32,
    /// `EBX` output.
    pub ebx: u32,
    /// `ECX` output.
    pub ecx: u32,
    /// `EDX` output.
    pub edx: u32,
}

/// Installed identity state: packed vendor, reported level, leaf table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityTable {
    vendor: [u8; VENDOR_ID_BYTES],
    level: u32,
    leaves: [CpuidLevelInfo; CPUID_LEAF_COUNT],
}

impl IdentityTable {
    /// Validates and installs a host configuration.
    ///
    /// Short vendor strings are zero-padded into the twelve-byte field.
    ///
    /// # Errors
    ///
    /// Returns a [`CpuidConfigError`] when the vendor string is empty,
    /// longer than twelve bytes, or not ASCII.
    pub fn install(config: &CpuidConfig) -> Result<Self, CpuidConfigError> {
        let bytes = config.vendor.as_bytes();
        if bytes.is_empty() {
            return Err(CpuidConfigError::EmptyVendor);
        }
        if bytes.len() > VENDOR_ID_BYTES {
            return Err(CpuidConfigError::VendorTooLong);
        }
        if !config.vendor.is_ascii() {
            return Err(CpuidConfigError::NonAsciiVendor);
        }

        let mut vendor = [0; VENDOR_ID_BYTES];
        vendor[..bytes.len()].copy_from_slice(bytes);

        Ok(Self {
            vendor,
            level: config.level,
            leaves: config.leaves,
        })
    }

    /// Returns the packed vendor-identification bytes.
    #[must_use]
    pub const fn vendor(&self) -> &[u8; VENDOR_ID_BYTES] {
        &self.vendor
    }

    /// Returns the reported maximum standard leaf.
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Returns the stored record for a configurable leaf.
    #[must_use]
    pub const fn leaf(&self, leaf: CpuidLeaf) -> CpuidLevelInfo {
        self.leaves[leaf.index()]
    }

    /// Answers one identity query for the given `EAX` selector.
    ///
    /// Leaf zero packs the maximum standard leaf and the vendor string in
    /// the architectural `EBX`/`EDX`/`ECX` order; configured leaves are
    /// returned verbatim; every other selector reads as zeroes.
    #[must_use]
    pub fn query(&self, selector: u32) -> CpuidResult {
        if selector == 0 {
            return CpuidResult {
                eax: self.level,
                ebx: pack_u32(&self.vendor, 0),
                edx: pack_u32(&self.vendor, 4),
                ecx: pack_u32(&self.vendor, 8),
            };
        }

        CpuidLeaf::from_selector(selector).map_or_else(CpuidResult::default, |leaf| {
            let info = self.leaf(leaf);
            CpuidResult {
                eax: info.eax,
                ebx: info.ebx,
                ecx: info.ecx,
                edx: info.edx,
            }
        })
    }
}

fn pack_u32(bytes: &[u8; VENDOR_ID_BYTES], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
