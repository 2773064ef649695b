//! Engine and per-way configuration
//!
//! All parameters derive from the chip geometry; nothing here is read from
//! a file.

use crate::error::{ExmError, Result};
use crate::hasher::{GaloisMatrix, HashLayout};
use crate::parity::ParityGroup;
use crate::resolver::{MissDefaults, NextTableId, ShiftCounts, WayRoute};
use exm_chip::layout::{parity_group_mask, UnitRamLayout, MAX_MATCH_BITS, WAY_MATCH_WORDS, WORD_BITS};
use exm_chip::RamGeometry;
use tracing::debug;

/// Default primary-way compare width (two `match_data` words).
#[allow(clippy::cast_possible_truncation)]
pub const DEFAULT_MATCH_WIDTH: u32 = WAY_MATCH_WORDS as u32 * WORD_BITS;

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Physical array shape.
    pub geometry: RamGeometry,

    /// Parity groups sealed into every stash slot.
    pub stash_parity_groups: Vec<ParityGroup>,

    /// Next table and address triples used on miss (masks and defaults
    /// also apply on hit).
    pub miss_defaults: MissDefaults,

    /// Recompute parity on every lookup read
    pub parity_on_read: bool,
}

impl EngineConfig {
    /// Configuration for `geometry` with no parity groups and zeroed
    /// miss defaults.
    pub fn from_geometry(geometry: &RamGeometry) -> Self {
        debug!(
            "engine config: {}×{} array, {} stash/row, {} versions, {} ways",
            geometry.rows,
            geometry.banks,
            geometry.stash_slots,
            geometry.version_count(),
            geometry.max_ways
        );
        Self {
            geometry: *geometry,
            stash_parity_groups: Vec::new(),
            miss_defaults: MissDefaults::default(),
            parity_on_read: true,
        }
    }

    /// Replace the stash parity groups.
    #[must_use]
    pub fn with_stash_parity_groups(mut self, groups: Vec<ParityGroup>) -> Self {
        self.stash_parity_groups = groups;
        self
    }

    /// Replace the miss defaults.
    #[must_use]
    pub fn with_miss_defaults(mut self, miss_defaults: MissDefaults) -> Self {
        self.miss_defaults = miss_defaults;
        self
    }

    /// Enable or disable parity checks on the lookup path. Scrubs always
    /// check.
    #[must_use]
    pub fn with_parity_on_read(mut self, enabled: bool) -> Self {
        self.parity_on_read = enabled;
        self
    }

    /// Refuse zero-sized or over-wide geometry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending dimension.
    pub fn validate(&self) -> Result<()> {
        let g = &self.geometry;
        if g.rows == 0 || g.banks == 0 {
            return Err(ExmError::config(format!("empty array {}×{}", g.rows, g.banks)));
        }
        if g.max_ways == 0 || u32::from(g.max_ways) > u32::BITS {
            return Err(ExmError::config(format!("{} ways, need 1..=32", g.max_ways)));
        }
        if g.stash_slots > RamGeometry::MAX_STASH_SLOTS {
            return Err(ExmError::config(format!(
                "{} stash slots per row, limit {}",
                g.stash_slots,
                RamGeometry::MAX_STASH_SLOTS
            )));
        }
        if g.version_bits > RamGeometry::MAX_VERSION_BITS {
            return Err(ExmError::config(format!(
                "{}-bit version tag, limit {}",
                g.version_bits,
                RamGeometry::MAX_VERSION_BITS
            )));
        }
        if self.stash_parity_groups.len() > parity_group_mask::MAX_GROUPS {
            return Err(ExmError::config(format!(
                "{} stash parity groups, limit {}",
                self.stash_parity_groups.len(),
                parity_group_mask::MAX_GROUPS
            )));
        }
        Ok(())
    }

    /// Create minimal configuration for testing: 2 rows × 2 banks, 2 stash
    /// slots, 1-bit version, 2 ways.
    #[cfg(test)]
    pub fn minimal() -> Self {
        Self::from_geometry(&RamGeometry {
            rows: 2,
            banks: 2,
            stash_slots: 2,
            version_bits: 1,
            max_ways: 2,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_geometry(&RamGeometry::REFERENCE)
    }
}

/// Everything one way needs: hash, address slicing, compare width, parity
/// and routing.
#[derive(Debug, Clone)]
pub struct WayConfig {
    /// Galois matrix (input width = key width).
    pub matrix: GaloisMatrix,
    /// Key formatting before the matrix.
    pub layout: HashLayout,
    /// `unitram_config` slicing of the hash output.
    pub address_layout: UnitRamLayout,
    /// Compare width of every entry in the way.
    pub match_width: u32,
    /// Parity groups sealed into every entry.
    pub parity_groups: Vec<ParityGroup>,
    /// Next table on hit.
    pub next_table: NextTableId,
    /// `exact_shiftcount` per address output.
    pub shiftcounts: ShiftCounts,
}

impl WayConfig {
    /// Way hashing with `matrix` and slicing with `address_layout`; compare
    /// width follows the matrix input width.
    pub fn new(matrix: GaloisMatrix, address_layout: UnitRamLayout) -> Self {
        let match_width = matrix.input_width();
        Self {
            matrix,
            layout: HashLayout::default(),
            address_layout,
            match_width,
            parity_groups: Vec::new(),
            next_table: NextTableId::default(),
            shiftcounts: ShiftCounts::default(),
        }
    }

    /// Way with an identity hash over a [`DEFAULT_MATCH_WIDTH`]-bit key.
    ///
    /// # Errors
    ///
    /// Propagates the matrix construction error.
    pub fn identity(address_layout: UnitRamLayout) -> Result<Self> {
        Ok(Self::new(GaloisMatrix::identity(DEFAULT_MATCH_WIDTH)?, address_layout))
    }

    /// Replace the input layout.
    #[must_use]
    pub fn with_layout(mut self, layout: HashLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Replace the parity groups.
    #[must_use]
    pub fn with_parity_groups(mut self, groups: Vec<ParityGroup>) -> Self {
        self.parity_groups = groups;
        self
    }

    /// Replace the hit routing.
    #[must_use]
    pub fn with_route(mut self, next_table: NextTableId, shiftcounts: ShiftCounts) -> Self {
        self.next_table = next_table;
        self.shiftcounts = shiftcounts;
        self
    }

    /// Hit routing for the resolver.
    pub const fn route(&self) -> WayRoute {
        WayRoute {
            next_table: self.next_table,
            shiftcounts: self.shiftcounts,
        }
    }

    /// Check the pieces agree with each other.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the compare width differs from the
    /// matrix input width, or the address layout reads beyond the hash.
    pub fn validate(&self) -> Result<()> {
        if self.match_width == 0 || self.match_width > MAX_MATCH_BITS {
            return Err(ExmError::config(format!(
                "match width {} outside 1..={MAX_MATCH_BITS}",
                self.match_width
            )));
        }
        if self.match_width != self.matrix.input_width() {
            return Err(ExmError::config(format!(
                "match width {} differs from matrix input width {}",
                self.match_width,
                self.matrix.input_width()
            )));
        }
        let needed = self.address_layout.required_hash_bits();
        if needed > self.matrix.output_width() {
            return Err(ExmError::config(format!(
                "unitram_config reads {needed} hash bits, matrix produces {}",
                self.matrix.output_width()
            )));
        }
        self.layout.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exm_chip::layout::FieldSlice;

    #[test]
    fn reference_config_is_valid() {
        let c = EngineConfig::default();
        assert_eq!(c.geometry, RamGeometry::REFERENCE);
        assert!(c.parity_on_read);
        c.validate().unwrap();
        EngineConfig::minimal().validate().unwrap();
    }

    #[test]
    fn zero_rows_refused() {
        let g = RamGeometry { rows: 0, ..RamGeometry::REFERENCE };
        assert!(EngineConfig::from_geometry(&g).validate().is_err());
    }

    #[test]
    fn deep_stash_refused() {
        let g = RamGeometry { stash_slots: 9, ..RamGeometry::REFERENCE };
        assert!(EngineConfig::from_geometry(&g).validate().is_err());
    }

    #[test]
    fn identity_way_spans_two_match_words() {
        let w = WayConfig::identity(UnitRamLayout::REFERENCE).unwrap();
        assert_eq!(w.match_width, 64);
        assert_eq!(w.matrix.output_width(), 64);
        w.validate().unwrap();
    }

    #[test]
    fn way_config_follows_matrix_width() {
        let w = WayConfig::new(GaloisMatrix::identity(32).unwrap(), UnitRamLayout::REFERENCE);
        assert_eq!(w.match_width, 32);
        w.validate().unwrap();
    }

    #[test]
    fn layout_wider_than_hash_refused() {
        let wide = UnitRamLayout {
            row_select: FieldSlice::new(0, 3),
            bank_select: FieldSlice::new(3, 4),
            vpn: FieldSlice::new(7, 12),
        };
        // 16 hash bits cannot feed a layout reading 19
        let w = WayConfig::new(GaloisMatrix::identity(16).unwrap(), wide);
        assert!(w.validate().is_err());
    }

    #[test]
    fn match_width_mismatch_refused() {
        let mut w = WayConfig::new(GaloisMatrix::identity(32).unwrap(), UnitRamLayout::REFERENCE);
        w.match_width = 64;
        assert!(matches!(w.validate(), Err(ExmError::Config { .. })));
    }
}
