//! Match keys
//!
//! A match key is an ordered sequence of header fields packed into one
//! bit vector. The engine only cares about its total width; the first field
//! occupies the low bits.

use crate::error::{ExmError, Result};
use exm_chip::layout::{self, MAX_KEY_BITS};

/// Mask with the low `width` bits set.
#[must_use]
pub const fn width_mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Packed match key, up to 128 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchKey {
    bits: u128,
    width: u32,
}

impl MatchKey {
    /// Create a key of `width` bits.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `width` is zero or wider than 128
    /// bits, or if `bits` has set bits above `width`.
    pub fn new(bits: u128, width: u32) -> Result<Self> {
        if width == 0 || width > MAX_KEY_BITS {
            return Err(ExmError::config(format!(
                "key width {width} outside 1..={MAX_KEY_BITS}"
            )));
        }
        if bits & !width_mask(width) != 0 {
            return Err(ExmError::config(format!(
                "key value 0x{bits:x} does not fit in {width} bits"
            )));
        }
        Ok(Self { bits, width })
    }

    /// Pack `(value, width)` fields in order, first field lowest.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any field overflows its width or the
    /// total exceeds 128 bits.
    pub fn from_fields(fields: &[(u128, u32)]) -> Result<Self> {
        let mut bits = 0u128;
        let mut offset = 0u32;
        for &(value, width) in fields {
            let end = offset
                .checked_add(width)
                .filter(|&end| end <= MAX_KEY_BITS)
                .ok_or_else(|| {
                    ExmError::config(format!(
                        "key field of {width} bits at offset {offset} passes the {MAX_KEY_BITS}-bit limit"
                    ))
                })?;
            if value & !width_mask(width) != 0 {
                return Err(ExmError::config(format!(
                    "field value 0x{value:x} does not fit in {width} bits"
                )));
            }
            if width > 0 {
                bits |= value << offset;
            }
            offset = end;
        }
        Self::new(bits, offset)
    }

    /// Assemble a key from 32-bit words, low word first.
    ///
    /// # Errors
    ///
    /// Same as [`MatchKey::new`].
    pub fn from_words(words: &[u32], width: u32) -> Result<Self> {
        Self::new(layout::join_words(words), width)
    }

    /// Raw key bits.
    #[must_use]
    pub const fn bits(&self) -> u128 {
        self.bits
    }

    /// Key width in bits.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Value of bit `i` (false beyond the width).
    #[must_use]
    pub const fn bit(&self, i: u32) -> bool {
        i < self.width && (self.bits >> i) & 1 == 1
    }
}
