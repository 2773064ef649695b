//! Multi-way exact-match hash lookup engine.
//!
//! A behavioural model of the exact-match unit of a match-action pipeline
//! stage: N independently hashed ways share one rows × banks SRAM array, a
//! per-row stash catches collisions, entries carry a version tag for
//! make-before-break reloads, and parity groups guard every stored word.
//!
//! # Pipeline
//!
//! ```text
//! MatchKey ─ GaloisHasher ─ HashOutput ─ BankAddressMapper ─ BankCoordinate
//!                                                               │
//!          ExactMatchWay × N  (version-gated, parity-checked) ◄─┘
//!                 │ all miss
//!          StashOverflow (lowest slot wins)
//!                 │
//!          NextTableResolver ─ Resolution { next table, 5 addresses, hit map }
//! ```
//!
//! # Quick start
//!
//! ```
//! use exm_engine::prelude::*;
//! use exm_engine::chip::{FieldSlice, UnitRamLayout};
//!
//! # fn main() -> exm_engine::Result<()> {
//! let mut engine = EngineState::new(EngineConfig::default())?;
//! let layout = UnitRamLayout {
//!     row_select: FieldSlice::new(1, 3),
//!     bank_select: FieldSlice::new(4, 4),
//!     vpn: FieldSlice::new(8, 12),
//! };
//! engine.configure_way(0, WayConfig::new(GaloisMatrix::identity(32)?, layout))?;
//!
//! let entry = RamEntry::new(0xFFFF_FFFE, 0x1234_0000, 32, 0xA94)?;
//! engine.insert(0, BankCoordinate::new(0, 0, 0), entry, VersionTag::ZERO)?;
//!
//! let out = engine.lookup(&MatchKey::new(0x1234_0001, 32)?)?;
//! assert_eq!(out.resolution.hit().map(|h| h.vpn), Some(0xA94));
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Configuration and range errors are returned as `Err` and leave the engine
//! unchanged. Parity errors never fail a lookup; they ride along in
//! [`LookupOutcome::parity_errors`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod config;
mod engine;
mod error;
mod hasher;
mod ingress;
pub mod journal;
mod key;
mod mapper;
mod parity;
mod resolver;
mod stash;
mod version;
mod way;

pub use config::{EngineConfig, WayConfig, DEFAULT_MATCH_WIDTH};
pub use engine::{EngineState, LookupOutcome};
pub use error::{ExmError, Result};
pub use hasher::{GaloisHasher, GaloisMatrix, HashLayout, HashOutput};
pub use ingress::ConfigWrite;
pub use key::{width_mask, MatchKey};
pub use mapper::{BankAddressMapper, BankCoordinate};
pub use parity::{ParityError, ParityField, ParityFields, ParityGroup, ParityValidator, ParityWord};
pub use resolver::{
    AddressDefault, AddressKind, MissDefaults, NextTableId, NextTableResolver, Outcome,
    ResolvedAddresses, Resolution, ShiftCounts, WayRoute,
};
pub use stash::{StashEntry, StashOverflow};
pub use version::{VersionGate, VersionTag};
pub use way::{ExactMatchWay, Hit, HitSource, RamEntry, UnitRamCtl};

/// Chip model constants (re-exported from exm-chip).
pub mod chip {
    pub use exm_chip::layout::{FieldSlice, UnitRamLayout};
    pub use exm_chip::RamGeometry;
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BankCoordinate, ConfigWrite, EngineConfig, EngineState, ExmError, GaloisMatrix,
        HashLayout, Hit, LookupOutcome, MatchKey, MissDefaults, NextTableId, ParityError,
        ParityField, ParityGroup, RamEntry, Resolution, Result, StashEntry, VersionTag, WayConfig,
    };
}
