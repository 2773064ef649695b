//! Galois-matrix hash generation
//!
//! Each way owns a binary matrix: output bit `i` is the XOR of the key bits
//! selected by row `i`. The "galois field matrix" name comes from the
//! register map; functionally it is a linear map over GF(2), optionally
//! followed by an XOR seed.
//!
//! ```text
//!   key ──► HashLayout (V1 byte swizzle | V2 nibble enable)
//!       ──► GF(2) matrix  (rows × input_width)
//!       ──► ⊕ seed
//!       ──► HashOutput (≤ 64 bits, two ram_address_mux words)
//! ```
//!
//! Hashing is a pure function of key and configuration.

use crate::error::{ExmError, Result};
use crate::key::{width_mask, MatchKey};
use exm_chip::layout::{self, hash_input, MAX_HASH_BITS, MAX_KEY_BITS, RAM_ADDRESS_MUX_WORDS};
use tracing::{debug, info};

// ── Hash output ──────────────────────────────────────────────────────────────

/// One way's hash result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashOutput {
    value: u64,
    width: u32,
}

impl HashOutput {
    /// Create a hash output of `width` bits.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `width` exceeds 64 bits or `value`
    /// has bits above `width`.
    pub fn new(value: u64, width: u32) -> Result<Self> {
        if width == 0 || width > MAX_HASH_BITS {
            return Err(ExmError::config(format!(
                "hash width {width} outside 1..={MAX_HASH_BITS}"
            )));
        }
        if u128::from(value) & !width_mask(width) != 0 {
            return Err(ExmError::config(format!(
                "hash value 0x{value:x} does not fit in {width} bits"
            )));
        }
        Ok(Self { value, width })
    }

    /// Reassemble a hash from `ram_address_mux` words, low word first.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if more than two words are given or the
    /// assembled value does not fit in `width`.
    pub fn from_mux_words(words: &[u32], width: u32) -> Result<Self> {
        if words.len() > RAM_ADDRESS_MUX_WORDS {
            return Err(ExmError::config(format!(
                "{} ram_address_mux words, hardware carries {RAM_ADDRESS_MUX_WORDS}",
                words.len()
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        let value = layout::join_words(words) as u64;
        Self::new(value, width)
    }

    /// Split into `ram_address_mux` words, low word first.
    #[must_use]
    pub fn to_mux_words(&self) -> Vec<u32> {
        layout::split_words(u128::from(self.value), RAM_ADDRESS_MUX_WORDS)
    }

    /// Hash bits.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Hash width in bits.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }
}

// ── Hash input formatting ────────────────────────────────────────────────────

/// How key bits are presented to the matrix. Selected per way at
/// configuration time; the two revisions never coexist on one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashLayout {
    /// Revision 1: output byte lane `i` carries input byte `byte_swizzle[i]`.
    V1 {
        /// Input byte select per lane.
        byte_swizzle: [u8; hash_input::V1_SWIZZLE_LANES],
    },
    /// Revision 2: key nibbles with a clear enable bit are forced to zero.
    V2 {
        /// Bit `n` enables nibble `n`.
        nibble_enable: u32,
    },
}

impl HashLayout {
    /// Revision 1 with the identity swizzle.
    pub const V1_IDENTITY: Self = Self::V1 {
        byte_swizzle: [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    };

    /// Revision 2 with every nibble enabled.
    pub const V2_ALL: Self = Self::V2 {
        nibble_enable: u32::MAX,
    };

    /// Check lane selects are in range.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a V1 select past the last lane.
    pub fn validate(&self) -> Result<()> {
        if let Self::V1 { byte_swizzle } = self {
            if let Some((lane, &sel)) = byte_swizzle
                .iter()
                .enumerate()
                .find(|(_, &s)| usize::from(s) >= hash_input::V1_SWIZZLE_LANES)
            {
                return Err(ExmError::config(format!(
                    "byte_swizzle lane {lane} selects byte {sel}, limit {}",
                    hash_input::V1_SWIZZLE_LANES
                )));
            }
        }
        Ok(())
    }

    /// Format raw key bits for the matrix.
    #[must_use]
    pub fn format(&self, bits: u128) -> u128 {
        match self {
            Self::V1 { byte_swizzle } => {
                let bytes = bits.to_le_bytes();
                let mut out = [0u8; 16];
                for (lane, &sel) in byte_swizzle.iter().enumerate() {
                    out[lane] = bytes[usize::from(sel) % 16];
                }
                u128::from_le_bytes(out)
            }
            Self::V2 { nibble_enable } => bits & layout::nibble_mask(*nibble_enable),
        }
    }
}

impl Default for HashLayout {
    fn default() -> Self {
        Self::V2_ALL
    }
}

// ── Galois matrix ────────────────────────────────────────────────────────────

/// Binary hash matrix for one way. Dimensions are fixed once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaloisMatrix {
    input_width: u32,
    /// Row `i` selects the key bits XORed into output bit `i`.
    rows: Vec<u128>,
    seed: u64,
}

impl GaloisMatrix {
    /// Build from explicit row selections.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the input width is outside
    /// `1..=128`, there are no rows or more than 64, or a row selects a bit
    /// at or above `input_width`.
    pub fn from_rows(input_width: u32, rows: Vec<u128>) -> Result<Self> {
        if input_width == 0 || input_width > MAX_KEY_BITS {
            return Err(ExmError::config(format!(
                "matrix input width {input_width} outside 1..={MAX_KEY_BITS}"
            )));
        }
        if rows.is_empty() || rows.len() > MAX_HASH_BITS as usize {
            return Err(ExmError::config(format!(
                "matrix has {} rows, need 1..={MAX_HASH_BITS}",
                rows.len()
            )));
        }
        let limit = width_mask(input_width);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, &r)| r & !limit != 0) {
            return Err(ExmError::config(format!(
                "matrix row {i} (0x{row:x}) selects bits beyond input width {input_width}"
            )));
        }
        Ok(Self {
            input_width,
            rows,
            seed: 0,
        })
    }

    /// Identity matrix: output bit `i` = key bit `i`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `width` exceeds 64 bits.
    pub fn identity(width: u32) -> Result<Self> {
        if width > MAX_HASH_BITS {
            return Err(ExmError::config(format!(
                "identity matrix width {width} exceeds hash width {MAX_HASH_BITS}"
            )));
        }
        Self::from_rows(width, (0..width).map(|i| 1u128 << i).collect())
    }

    /// Set the XOR seed applied after the matrix.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the seed is wider than the output.
    pub fn with_seed(mut self, seed: u64) -> Result<Self> {
        if u128::from(seed) & !width_mask(self.output_width()) != 0 {
            return Err(ExmError::config(format!(
                "hash seed 0x{seed:x} wider than {} output bits",
                self.output_width()
            )));
        }
        self.seed = seed;
        Ok(self)
    }

    /// Key bits consumed.
    #[must_use]
    pub const fn input_width(&self) -> u32 {
        self.input_width
    }

    /// Hash bits produced.
    #[must_use]
    pub fn output_width(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let w = self.rows.len() as u32;
        w
    }

    /// Matrix rows.
    #[must_use]
    pub fn rows(&self) -> &[u128] {
        &self.rows
    }

    /// XOR seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Multiply formatted key bits by the matrix.
    #[must_use]
    pub fn apply(&self, bits: u128) -> u64 {
        let linear = self
            .rows
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &row)| {
                acc | (u64::from((bits & row).count_ones() & 1) << i)
            });
        linear ^ self.seed
    }
}

// ── Hasher ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct WayHash {
    matrix: GaloisMatrix,
    layout: HashLayout,
}

/// Per-way hash generator.
#[derive(Debug, Clone)]
pub struct GaloisHasher {
    ways: Vec<Option<WayHash>>,
}

impl GaloisHasher {
    /// Hasher with `max_ways` unconfigured slots.
    pub fn new(max_ways: usize) -> Self {
        Self {
            ways: vec![None; max_ways],
        }
    }

    /// Install the matrix and input layout for `way`.
    ///
    /// A way's matrix dimensions are fixed for its lifetime: reconfiguring
    /// with different dimensions is refused.
    ///
    /// # Errors
    ///
    /// Returns a range error for an unknown way, or a configuration error
    /// for an invalid layout or a dimension change.
    pub fn configure(&mut self, way: usize, matrix: GaloisMatrix, layout: HashLayout) -> Result<()> {
        let limit = self.ways.len();
        let slot = self
            .ways
            .get_mut(way)
            .ok_or_else(|| ExmError::range("way", way as u64, limit as u64))?;
        layout.validate()?;
        if let Some(existing) = slot {
            let (old_in, old_out) = (existing.matrix.input_width(), existing.matrix.output_width());
            if old_in != matrix.input_width() || old_out != matrix.output_width() {
                return Err(ExmError::config(format!(
                    "way {way} matrix is {old_out}×{old_in}, refusing {}×{}",
                    matrix.output_width(),
                    matrix.input_width()
                )));
            }
        }
        info!(
            "way {way}: galois matrix {}×{} seed=0x{:x} layout={layout:?}",
            matrix.output_width(),
            matrix.input_width(),
            matrix.seed()
        );
        *slot = Some(WayHash { matrix, layout });
        Ok(())
    }

    /// Matrix installed for `way`, if any.
    pub fn matrix(&self, way: usize) -> Option<&GaloisMatrix> {
        self.ways.get(way)?.as_ref().map(|w| &w.matrix)
    }

    /// Hash `key` for `way`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the way has no matrix or the key
    /// width differs from the matrix input width.
    pub fn hash(&self, way: usize, key: &MatchKey) -> Result<HashOutput> {
        let cfg = self
            .ways
            .get(way)
            .and_then(Option::as_ref)
            .ok_or_else(|| ExmError::config(format!("way {way} has no galois matrix")))?;
        if key.width() != cfg.matrix.input_width() {
            return Err(ExmError::config(format!(
                "way {way}: key is {} bits, matrix expects {}",
                key.width(),
                cfg.matrix.input_width()
            )));
        }
        let formatted = cfg.layout.format(key.bits()) & width_mask(key.width());
        let value = cfg.matrix.apply(formatted);
        debug!("way {way}: hash(0x{:x}) = 0x{value:x}", key.bits());
        HashOutput::new(value, cfg.matrix.output_width())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity_hasher(width: u32) -> GaloisHasher {
        let mut h = GaloisHasher::new(2);
        h.configure(0, GaloisMatrix::identity(width).unwrap(), HashLayout::V2_ALL)
            .unwrap();
        h
    }

    #[test]
    fn identity_passes_key_through() {
        let h = identity_hasher(32);
        let key = MatchKey::new(0x1234_0001, 32).unwrap();
        assert_eq!(h.hash(0, &key).unwrap().value(), 0x1234_0001);
    }

    #[test]
    fn unconfigured_way_is_config_error() {
        let h = identity_hasher(32);
        let key = MatchKey::new(1, 32).unwrap();
        assert!(matches!(h.hash(1, &key), Err(ExmError::Config { .. })));
        assert!(matches!(h.hash(7, &key), Err(ExmError::Config { .. })));
    }

    #[test]
    fn key_width_mismatch_is_config_error() {
        let h = identity_hasher(32);
        let key = MatchKey::new(1, 16).unwrap();
        assert!(matches!(h.hash(0, &key), Err(ExmError::Config { .. })));
    }

    #[test]
    fn matrix_dimensions_are_fixed() {
        let mut h = identity_hasher(32);
        let wider = GaloisMatrix::identity(48).unwrap();
        assert!(h.configure(0, wider, HashLayout::V2_ALL).is_err());
        let same = GaloisMatrix::identity(32).unwrap().with_seed(0xFF).unwrap();
        assert!(h.configure(0, same, HashLayout::V2_ALL).is_ok());
    }

    #[test]
    fn row_beyond_input_width_refused() {
        assert!(GaloisMatrix::from_rows(8, vec![1 << 8]).is_err());
        assert!(GaloisMatrix::from_rows(8, vec![]).is_err());
        assert!(GaloisMatrix::from_rows(8, vec![0xFF; 65]).is_err());
    }

    #[test]
    fn xor_fold_row() {
        // single output bit = parity of all 8 input bits
        let m = GaloisMatrix::from_rows(8, vec![0xFF]).unwrap();
        assert_eq!(m.apply(0b0000_0111), 1);
        assert_eq!(m.apply(0b0000_0011), 0);
    }

    #[test]
    fn seed_is_xored_after_matrix() {
        let m = GaloisMatrix::identity(8).unwrap().with_seed(0xA5).unwrap();
        assert_eq!(m.apply(0), 0xA5);
        assert!(GaloisMatrix::identity(8).unwrap().with_seed(0x100).is_err());
    }

    #[test]
    fn v1_swizzle_reorders_bytes() {
        let mut swizzle = [0u8; 16];
        swizzle[0] = 1;
        swizzle[1] = 0;
        let layout = HashLayout::V1 { byte_swizzle: swizzle };
        assert_eq!(layout.format(0xBBAA) & 0xFFFF, 0xAABB);
        assert_eq!(HashLayout::V1_IDENTITY.format(0xDEAD_BEEF), 0xDEAD_BEEF);
    }

    #[test]
    fn v1_swizzle_out_of_range_refused() {
        let mut swizzle = [0u8; 16];
        swizzle[3] = 16;
        assert!(HashLayout::V1 { byte_swizzle: swizzle }.validate().is_err());
    }

    #[test]
    fn v2_disabled_nibbles_do_not_affect_hash() {
        let mut h = GaloisHasher::new(1);
        // nibble 0 disabled
        let layout = HashLayout::V2 { nibble_enable: !1 };
        h.configure(0, GaloisMatrix::identity(16).unwrap(), layout).unwrap();
        let a = h.hash(0, &MatchKey::new(0xAB0, 16).unwrap()).unwrap();
        let b = h.hash(0, &MatchKey::new(0xAB7, 16).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mux_words_reassemble_low_first() {
        let h = HashOutput::from_mux_words(&[0xDEAD_BEEF, 0x0000_0ABC], 44).unwrap();
        assert_eq!(h.value(), 0x0ABC_DEAD_BEEF);
        assert_eq!(h.to_mux_words(), vec![0xDEAD_BEEF, 0x0000_0ABC]);
        assert!(HashOutput::from_mux_words(&[0, 0, 0], 64).is_err());
    }

    proptest! {
        #[test]
        fn hash_is_deterministic(key in any::<u64>(), rows in proptest::collection::vec(any::<u64>(), 1..=52)) {
            let rows: Vec<u128> = rows.into_iter().map(u128::from).collect();
            let mut h = GaloisHasher::new(1);
            h.configure(0, GaloisMatrix::from_rows(64, rows).unwrap(), HashLayout::V2_ALL).unwrap();
            let k = MatchKey::new(u128::from(key), 64).unwrap();
            prop_assert_eq!(h.hash(0, &k).unwrap(), h.hash(0, &k).unwrap());
        }

        #[test]
        fn unseeded_hash_is_linear(a in any::<u64>(), b in any::<u64>(), rows in proptest::collection::vec(any::<u64>(), 1..=64)) {
            let rows: Vec<u128> = rows.into_iter().map(u128::from).collect();
            let m = GaloisMatrix::from_rows(64, rows).unwrap();
            let (a, b) = (u128::from(a), u128::from(b));
            prop_assert_eq!(m.apply(a ^ b), m.apply(a) ^ m.apply(b));
        }

        #[test]
        fn mux_words_round_trip(value in any::<u64>()) {
            let h = HashOutput::new(value, 64).unwrap();
            let back = HashOutput::from_mux_words(&h.to_mux_words(), 64).unwrap();
            prop_assert_eq!(h, back);
        }
    }
}
