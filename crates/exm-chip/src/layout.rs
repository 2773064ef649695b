//! Register-word layouts for the exact-match unit.
//!
//! All configuration reaches the unit as whole 32-bit words. Wide fields
//! span several consecutive words and are always assembled **low word
//! first**.
//!
//! ## Observed word counts
//!
//! ```text
//! match_mask / match_data        2 words   (64 compare bits per way entry)
//! stash_match_mask / data        4 words   (128 compare bits per stash slot)
//! ram_address_mux                2 words   (hash output, up to 64 bits)
//! match_nibble_*_enable          1 word per match word (8 nibbles each)
//! parity_group_mask              2 half-words (lo, hi) per group
//! ```

// ── Word geometry ────────────────────────────────────────────────────────────

/// Register word width.
pub const WORD_BITS: u32 = 32;

/// Widest compare supported by any comparator (stash width).
pub const MAX_MATCH_BITS: u32 = 128;

/// Widest hash output (two `ram_address_mux` words).
pub const MAX_HASH_BITS: u32 = 64;

/// Widest galois matrix input (one full match key).
pub const MAX_KEY_BITS: u32 = MAX_MATCH_BITS;

// ── Match RAM entry words ────────────────────────────────────────────────────

/// Default mask/data words per primary way entry.
pub const WAY_MATCH_WORDS: usize = 2;

/// Mask/data words per stash slot. Stash comparators are twice as wide as
/// the primary way comparators on the reference unit.
pub const STASH_MATCH_WORDS: usize = 4;

/// `ram_address_mux` words carrying one hash output.
pub const RAM_ADDRESS_MUX_WORDS: usize = 2;

/// Assemble little-endian-ordered words (low word first) into one value.
///
/// Words beyond the fourth are ignored.
#[must_use]
pub fn join_words(words: &[u32]) -> u128 {
    words
        .iter()
        .take(4)
        .enumerate()
        .fold(0u128, |acc, (i, &w)| acc | (u128::from(w) << (i as u32 * WORD_BITS)))
}

/// Split a value into `count` words, low word first.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn split_words(value: u128, count: usize) -> Vec<u32> {
    (0..count.min(4))
        .map(|i| (value >> (i as u32 * WORD_BITS)) as u32)
        .collect()
}

/// Expand a per-nibble enable bitmap into a bit mask (bit `n` → nibble `n`).
#[must_use]
pub const fn nibble_mask(enable: u32) -> u128 {
    let mut mask = 0u128;
    let mut n = 0;
    while n < hash_input::V2_NIBBLE_LANES {
        if enable & (1 << n) != 0 {
            mask |= 0xF << (n * 4);
        }
        n += 1;
    }
    mask
}

// ── unitram_config ───────────────────────────────────────────────────────────

/// One contiguous bit field inside a hash output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlice {
    /// Least significant bit position.
    pub lsb: u8,
    /// Field width in bits.
    pub width: u8,
}

impl FieldSlice {
    /// New slice `[lsb, lsb + width)`.
    #[must_use]
    pub const fn new(lsb: u8, width: u8) -> Self {
        Self { lsb, width }
    }

    /// Exclusive upper bit position.
    #[must_use]
    pub const fn msb_exclusive(&self) -> u32 {
        self.lsb as u32 + self.width as u32
    }

    /// Extract this field from a hash word.
    #[must_use]
    pub const fn extract(&self, word: u64) -> u64 {
        if self.width == 0 {
            return 0;
        }
        let shifted = if self.lsb >= 64 { 0 } else { word >> self.lsb };
        if self.width >= 64 {
            shifted
        } else {
            shifted & ((1u64 << self.width) - 1)
        }
    }
}

/// `unitram_config` slicing of a hash output into row, bank and VPN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRamLayout {
    /// Row-select bits.
    pub row_select: FieldSlice,
    /// Bank-select bits.
    pub bank_select: FieldSlice,
    /// Virtual page number bits.
    pub vpn: FieldSlice,
}

impl UnitRamLayout {
    /// Reference layout: row `[0,3)`, bank `[3,7)`, VPN `[7,19)`.
    pub const REFERENCE: Self = Self {
        row_select: FieldSlice::new(0, 3),
        bank_select: FieldSlice::new(3, 4),
        vpn: FieldSlice::new(7, 12),
    };

    /// Highest hash bit (exclusive) any field reads.
    #[must_use]
    pub const fn required_hash_bits(&self) -> u32 {
        let a = self.row_select.msb_exclusive();
        let b = self.bank_select.msb_exclusive();
        let c = self.vpn.msb_exclusive();
        let ab = if a > b { a } else { b };
        if ab > c {
            ab
        } else {
            c
        }
    }
}

// ── unit_ram_ctl ─────────────────────────────────────────────────────────────

/// `unit_ram_ctl` flag bits.
pub mod unit_ram_ctl {
    /// Entry participates in lookups.
    pub const ENABLE: u8 = 1 << 0;
    /// Entry is covered by parity groups on read.
    pub const PARITY_ENABLE: u8 = 1 << 1;
    /// All defined bits.
    pub const ALL: u8 = ENABLE | PARITY_ENABLE;
}

// ── Stash routing ────────────────────────────────────────────────────────────

/// Stash slot routing fields.
pub mod stash {
    /// `result_bus_select` width: selects which way's result bus a stash hit drives.
    pub const RESULT_BUS_SELECT_BITS: u32 = 2;
    /// `input_data_ctl` routing code 0: full-key input bus.
    pub const INPUT_FULL_KEY: u8 = 0;
    /// `input_data_ctl` routing code 1: low-half input bus. Reported with
    /// the hit; the compare always covers the full slot.
    pub const INPUT_LOW_HALF: u8 = 1;
    /// `input_data_ctl` routing code 2: high-half input bus. Reported only.
    pub const INPUT_HIGH_HALF: u8 = 2;
}

// ── Parity ───────────────────────────────────────────────────────────────────

/// `parity_group_mask` half-word pairs.
pub mod parity_group_mask {
    /// Half-word width.
    pub const HALF_WORD_BITS: u32 = 16;

    /// Join a (lo, hi) half-word pair into one 32-bit group mask.
    #[must_use]
    pub const fn join(lo: u16, hi: u16) -> u32 {
        ((hi as u32) << HALF_WORD_BITS) | lo as u32
    }

    /// Maximum parity groups per entry.
    pub const MAX_GROUPS: usize = 32;
}

// ── Address outputs ──────────────────────────────────────────────────────────

/// `mau_*_adr` outputs and `exact_shiftcount`.
pub mod adr {
    /// Number of resolved address outputs (instr, actiondata, stats, meter, idletime).
    pub const KINDS: usize = 5;
    /// Largest legal `exact_shiftcount`.
    pub const MAX_SHIFTCOUNT: u8 = 63;
    /// Register stem names, in output order.
    pub const NAMES: [&str; KINDS] = [
        "mau_instr_adr",
        "mau_actiondata_adr",
        "mau_stats_adr",
        "mau_meter_adr",
        "mau_idletime_adr",
    ];
}

// ── Hash input revisions ─────────────────────────────────────────────────────

/// Hash input formatting by hardware revision.
pub mod hash_input {
    /// Revision 1: one byte-swizzle select per input byte lane.
    pub const V1_SWIZZLE_LANES: usize = 16;
    /// Revision 2: per-nibble enable table replaces the byte swizzle.
    pub const V2_NIBBLE_LANES: u32 = 32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_assemble_low_first() {
        assert_eq!(join_words(&[0x1111_1111, 0x2222_2222]), 0x2222_2222_1111_1111);
        assert_eq!(split_words(0x2222_2222_1111_1111, 2), vec![0x1111_1111, 0x2222_2222]);
    }

    #[test]
    fn nibble_mask_expands() {
        assert_eq!(nibble_mask(0b1), 0xF);
        assert_eq!(nibble_mask(0b101), 0xF0F);
        assert_eq!(nibble_mask(u32::MAX), u128::MAX);
    }

    #[test]
    fn field_slice_extracts() {
        let f = FieldSlice::new(4, 8);
        assert_eq!(f.extract(0xABCD), 0xBC);
        assert_eq!(FieldSlice::new(0, 64).extract(u64::MAX), u64::MAX);
        assert_eq!(FieldSlice::new(3, 0).extract(u64::MAX), 0);
    }

    #[test]
    fn reference_layout_span() {
        assert_eq!(UnitRamLayout::REFERENCE.required_hash_bits(), 19);
    }

    #[test]
    fn parity_half_words_join() {
        assert_eq!(parity_group_mask::join(0x00FF, 0xF000), 0xF000_00FF);
    }
}
