//! Match RAM array geometry.
//!
//! A match unit is a 2-D array of SRAM rows × banks. Every configured way
//! hashes into the same physical array; each row additionally owns a small
//! fully-associative stash.
//!
//! ## Reference unit
//!
//! ```text
//!            bank 0   bank 1   ...   bank 11   stash[0..8]
//! row 0    [ entry ][ entry ]  ... [ entry ]  [ s0 .. s7 ]
//! row 1    [ entry ][ entry ]  ... [ entry ]  [ s0 .. s7 ]
//!  ...
//! row 7    [ entry ][ entry ]  ... [ entry ]  [ s0 .. s7 ]
//! ```
//!
//! Entries carry a 1-bit version tag on the reference unit, so every slot
//! holds two shadow copies (active + staged).

/// Physical shape of one match unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamGeometry {
    /// SRAM rows.
    pub rows: u8,
    /// Banks (columns) per row.
    pub banks: u8,
    /// Stash slots per row.
    pub stash_slots: u8,
    /// Width of the entry version tag in bits.
    pub version_bits: u8,
    /// Maximum ways that may hash into the array.
    pub max_ways: u8,
}

impl RamGeometry {
    /// Reference unit: 8 rows × 12 banks, 8-deep stash, 1-bit version, 4 ways.
    pub const REFERENCE: Self = Self {
        rows: 8,
        banks: 12,
        stash_slots: 8,
        version_bits: 1,
        max_ways: 4,
    };

    /// Largest stash depth the row comparators support.
    pub const MAX_STASH_SLOTS: u8 = 8;

    /// Largest supported version tag width.
    pub const MAX_VERSION_BITS: u8 = 4;

    /// Total primary entry slots (rows × banks).
    #[must_use]
    pub const fn total_slots(&self) -> u32 {
        (self.rows as u32) * (self.banks as u32)
    }

    /// Total stash slots across all rows.
    #[must_use]
    pub const fn total_stash_slots(&self) -> u32 {
        (self.rows as u32) * (self.stash_slots as u32)
    }

    /// Number of distinct version tags (`2^version_bits`).
    #[must_use]
    pub const fn version_count(&self) -> u32 {
        1 << self.version_bits
    }

    /// Bits needed to address a row.
    #[must_use]
    pub const fn row_bits(&self) -> u32 {
        index_bits(self.rows as u32)
    }

    /// Bits needed to address a bank.
    #[must_use]
    pub const fn bank_bits(&self) -> u32 {
        index_bits(self.banks as u32)
    }

    /// Pack a hit location into a match address: `{vpn, row, bank}`, bank in
    /// the low bits.
    ///
    /// Downstream consumers shift this word by `exact_shiftcount` to find
    /// their own field.
    #[must_use]
    pub const fn match_address(&self, vpn: u16, row: u8, bank: u8) -> u64 {
        let bank_bits = self.bank_bits();
        let row_bits = self.row_bits();
        ((vpn as u64) << (bank_bits + row_bits)) | ((row as u64) << bank_bits) | bank as u64
    }
}

impl Default for RamGeometry {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Minimum bits to index `n` items (`ceil(log2(n))`, at least 1).
const fn index_bits(n: u32) -> u32 {
    if n <= 2 {
        1
    } else {
        32 - (n - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_geometry() {
        let g = RamGeometry::REFERENCE;
        assert_eq!(g.total_slots(), 96);
        assert_eq!(g.total_stash_slots(), 64);
        assert_eq!(g.version_count(), 2);
    }

    #[test]
    fn index_bit_widths() {
        let g = RamGeometry::REFERENCE;
        assert_eq!(g.row_bits(), 3); // 8 rows
        assert_eq!(g.bank_bits(), 4); // 12 banks → 16 codes
        assert_eq!(index_bits(1), 1);
        assert_eq!(index_bits(9), 4);
    }

    #[test]
    fn match_address_packs_bank_low() {
        let g = RamGeometry::REFERENCE;
        // vpn 0xA94, row 5, bank 11
        let adr = g.match_address(0xA94, 5, 11);
        assert_eq!(adr & 0xF, 11);
        assert_eq!((adr >> 4) & 0x7, 5);
        assert_eq!(adr >> 7, 0xA94);
    }
}
