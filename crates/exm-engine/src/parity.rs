//! Parity groups and validation
//!
//! A parity group is a named mask over one entry field. Parity is even:
//! the stored bit makes the population count of `field & mask` plus the
//! bit even. Every write seals the parity of all groups; every read and
//! every scrub recomputes it.
//!
//! Group masks arrive as `parity_group_mask` half-word pairs (lo, hi), one
//! pair per 32-bit word of the field.

use exm_chip::layout::parity_group_mask::{self, MAX_GROUPS};
use exm_chip::layout::WORD_BITS;
use thiserror::Error;
use tracing::warn;

/// Entry field a parity group covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParityField {
    /// Match mask bits.
    Mask,
    /// Match data bits.
    Data,
}

/// Anything whose fields can be covered by parity groups.
pub trait ParityFields {
    /// Current bits of `field`.
    fn field_bits(&self, field: ParityField) -> u128;
}

/// Named mask over one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParityGroup {
    name: String,
    field: ParityField,
    mask: u128,
}

impl ParityGroup {
    /// Group covering `mask` bits of `field`.
    pub fn new(name: impl Into<String>, field: ParityField, mask: u128) -> Self {
        Self {
            name: name.into(),
            field,
            mask,
        }
    }

    /// Group from `parity_group_mask` (lo, hi) half-word pairs, word 0 first.
    pub fn from_half_words(name: impl Into<String>, field: ParityField, pairs: &[(u16, u16)]) -> Self {
        let mask = pairs.iter().take(4).enumerate().fold(0u128, |acc, (i, &(lo, hi))| {
            #[allow(clippy::cast_possible_truncation)]
            let shift = i as u32 * WORD_BITS;
            acc | (u128::from(parity_group_mask::join(lo, hi)) << shift)
        });
        Self::new(name, field, mask)
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Covered field.
    pub const fn field(&self) -> ParityField {
        self.field
    }

    /// Covered bits.
    pub const fn mask(&self) -> u128 {
        self.mask
    }
}

/// Sealed parity bits, bit `i` for group `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParityWord(u32);

impl ParityWord {
    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Stored parity of group `i`.
    pub const fn get(self, i: usize) -> u8 {
        ((self.0 >> i) & 1) as u8
    }
}

/// Recomputed parity differs from the stored parity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parity error in group '{group}' ({field:?}) at {location}: stored {expected}, computed {actual}")]
pub struct ParityError {
    /// Group name.
    pub group: String,
    /// Covered field.
    pub field: ParityField,
    /// Where the entry lives (way/stash, row, bank/slot, version).
    pub location: String,
    /// Stored parity bit.
    pub expected: u8,
    /// Recomputed parity bit.
    pub actual: u8,
}

/// Stateless parity computations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParityValidator;

impl ParityValidator {
    /// Even-parity bit of `bits & group.mask`.
    pub fn compute(group: &ParityGroup, bits: u128) -> u8 {
        ((bits & group.mask).count_ones() & 1) as u8
    }

    /// Compare recomputed parity of `current_bits` against `expected`.
    ///
    /// # Errors
    ///
    /// Returns a [`ParityError`] if they differ.
    pub fn check(group: &ParityGroup, current_bits: u128, expected: u8) -> Result<(), ParityError> {
        let actual = Self::compute(group, current_bits);
        if actual == expected & 1 {
            Ok(())
        } else {
            Err(ParityError {
                group: group.name.clone(),
                field: group.field,
                location: String::new(),
                expected: expected & 1,
                actual,
            })
        }
    }

    /// Seal parity of every group over `entry`.
    pub fn seal(groups: &[ParityGroup], entry: &impl ParityFields) -> ParityWord {
        ParityWord(groups.iter().take(MAX_GROUPS).enumerate().fold(0u32, |acc, (i, g)| {
            acc | (u32::from(Self::compute(g, entry.field_bits(g.field))) << i)
        }))
    }

    /// Recompute every group over `entry` and report mismatches.
    ///
    /// `location` is only called when a group mismatches. Each error is also
    /// logged at `warn`.
    pub fn verify(
        groups: &[ParityGroup],
        entry: &impl ParityFields,
        sealed: ParityWord,
        location: impl Fn() -> String,
    ) -> Vec<ParityError> {
        groups
            .iter()
            .take(MAX_GROUPS)
            .enumerate()
            .filter_map(|(i, g)| {
                Self::check(g, entry.field_bits(g.field), sealed.get(i))
                    .err()
                    .map(|mut e| {
                        e.location = location();
                        warn!("{e}");
                        e
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Bits {
        mask: u128,
        data: u128,
    }

    impl ParityFields for Bits {
        fn field_bits(&self, field: ParityField) -> u128 {
            match field {
                ParityField::Mask => self.mask,
                ParityField::Data => self.data,
            }
        }
    }

    #[test]
    fn even_parity() {
        let g = ParityGroup::new("g", ParityField::Data, 0xFF);
        assert_eq!(ParityValidator::compute(&g, 0b0111), 1);
        assert_eq!(ParityValidator::compute(&g, 0b0011), 0);
        // bits outside the mask are ignored
        assert_eq!(ParityValidator::compute(&g, 0x100), 0);
    }

    #[test]
    fn half_word_pairs_build_mask() {
        let g = ParityGroup::from_half_words("g", ParityField::Mask, &[(0x00FF, 0x0000), (0x0000, 0x8000)]);
        assert_eq!(g.mask(), 0x8000_0000_0000_00FF);
    }

    #[test]
    fn check_reports_group() {
        let g = ParityGroup::new("lo_byte", ParityField::Data, 0xFF);
        let err = ParityValidator::check(&g, 0b1, 0).unwrap_err();
        assert_eq!(err.group, "lo_byte");
        assert_eq!(err.expected, 0);
        assert_eq!(err.actual, 1);
    }

    #[test]
    fn seal_then_verify_clean() {
        let groups = vec![
            ParityGroup::new("m", ParityField::Mask, u128::MAX),
            ParityGroup::new("d", ParityField::Data, 0xFFFF_0000),
        ];
        let e = Bits { mask: 0xFFFF_FFFE, data: 0x1234_0000 };
        let sealed = ParityValidator::seal(&groups, &e);
        assert!(ParityValidator::verify(&groups, &e, sealed, || "t".to_string()).is_empty());
    }

    #[test]
    fn location_built_only_on_mismatch() {
        let groups = vec![ParityGroup::new("d", ParityField::Data, 0xFF)];
        let e = Bits { mask: 0, data: 0x3 };
        let sealed = ParityValidator::seal(&groups, &e);
        let calls = std::cell::Cell::new(0);
        let location = || {
            calls.set(calls.get() + 1);
            "way 0 slot 3".to_string()
        };

        assert!(ParityValidator::verify(&groups, &e, sealed, location).is_empty());
        assert_eq!(calls.get(), 0);

        let flipped = Bits { mask: 0, data: 0x7 };
        let errors = ParityValidator::verify(&groups, &flipped, sealed, location);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].location, "way 0 slot 3");
        assert_eq!(calls.get(), 1);
    }

    proptest! {
        #[test]
        fn single_flip_inside_mask_detected(data in any::<u64>(), bit in 0u32..32) {
            let groups = vec![ParityGroup::from_half_words("g", ParityField::Data, &[(0xFFFF, 0xFFFF)])];
            let clean = Bits { mask: 0, data: u128::from(data) };
            let sealed = ParityValidator::seal(&groups, &clean);
            let flipped = Bits { mask: 0, data: clean.data ^ (1u128 << bit) };
            prop_assert_eq!(ParityValidator::verify(&groups, &flipped, sealed, || "t".to_string()).len(), 1);
        }

        #[test]
        fn single_flip_outside_mask_ignored(data in any::<u64>(), bit in 32u32..128) {
            let groups = vec![ParityGroup::from_half_words("g", ParityField::Data, &[(0xFFFF, 0xFFFF)])];
            let clean = Bits { mask: 0, data: u128::from(data) };
            let sealed = ParityValidator::seal(&groups, &clean);
            let flipped = Bits { mask: 0, data: clean.data ^ (1u128 << bit) };
            prop_assert!(ParityValidator::verify(&groups, &flipped, sealed, || "t".to_string()).is_empty());
        }
    }
}
