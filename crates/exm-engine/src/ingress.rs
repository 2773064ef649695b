//! Typed configuration writes
//!
//! The register-bus harness decodes its `(address, data_words)` stream into
//! these values; [`EngineState::apply`](crate::EngineState::apply) turns each
//! one into a call on the typed engine API. Address decoding stays with the
//! harness.

use crate::config::WayConfig;
use crate::mapper::BankCoordinate;
use crate::parity::ParityGroup;
use crate::resolver::MissDefaults;
use crate::stash::StashEntry;
use crate::version::VersionTag;
use crate::way::RamEntry;

/// One configuration transaction step.
#[derive(Debug, Clone)]
pub enum ConfigWrite {
    /// Install hash, address slicing, parity and routing for a way.
    ConfigureWay {
        /// Way index.
        way: u8,
        /// Full way configuration.
        config: WayConfig,
    },
    /// Write a primary-way entry.
    InsertEntry {
        /// Way index.
        way: u8,
        /// Target slot.
        coord: BankCoordinate,
        /// Entry written whole.
        entry: RamEntry,
        /// Shadow copy written.
        version: VersionTag,
    },
    /// Clear the enables of a primary-way slot.
    EvictEntry {
        /// Way index.
        way: u8,
        /// Target slot.
        coord: BankCoordinate,
    },
    /// Write a stash slot.
    InsertStash {
        /// Physical row.
        row: u8,
        /// Slot within the row.
        slot: u8,
        /// Entry written whole.
        entry: StashEntry,
        /// Shadow copy written.
        version: VersionTag,
    },
    /// Clear `bank_enable` of a stash slot.
    EvictStash {
        /// Physical row.
        row: u8,
        /// Slot within the row.
        slot: u8,
    },
    /// Replace the stash parity groups.
    StashParity(Vec<ParityGroup>),
    /// Replace the miss defaults.
    MissDefaults(MissDefaults),
    /// Make a version active.
    SwapVersion(VersionTag),
    /// Disable every entry of an inactive version.
    RetireVersion(VersionTag),
}

impl ConfigWrite {
    /// Short name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigureWay { .. } => "configure-way",
            Self::InsertEntry { .. } => "insert-entry",
            Self::EvictEntry { .. } => "evict-entry",
            Self::InsertStash { .. } => "insert-stash",
            Self::EvictStash { .. } => "evict-stash",
            Self::StashParity(_) => "stash-parity",
            Self::MissDefaults(_) => "miss-defaults",
            Self::SwapVersion(_) => "swap-version",
            Self::RetireVersion(_) => "retire-version",
        }
    }
}
