//! Exact-match ways
//!
//! One way owns a full rows × banks array of hashed RAM entries, one shadow
//! copy per version tag. Entries are written whole: an insert replaces mask,
//! data, VPN and enables of the addressed copy as one unit.
//!
//! ## Match rule
//!
//! ```text
//! hit  ⇔  unit_ram_ctl.ENABLE
//!      ∧  entry.version == active_version
//!      ∧  (key & m) == (data & m)      where m = mask & nibble_mask(nibble_enable)
//! ```
//!
//! A `1` in the mask means "must match", a `0` means "don't care"; a
//! disabled nibble is "don't care" regardless of its mask bits.

use crate::error::{ExmError, Result};
use crate::key::{width_mask, MatchKey};
use crate::mapper::BankCoordinate;
use crate::parity::{ParityError, ParityField, ParityFields, ParityGroup, ParityValidator, ParityWord};
use crate::version::{VersionTag, VersionedArena};
use exm_chip::layout::{self, parity_group_mask, unit_ram_ctl, MAX_MATCH_BITS, WORD_BITS};
use exm_chip::RamGeometry;
use tracing::debug;

// ── unit_ram_ctl ─────────────────────────────────────────────────────────────

/// `unit_ram_ctl` flags of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitRamCtl(u8);

impl UnitRamCtl {
    /// Entry participates in lookups.
    pub const ENABLE: Self = Self(unit_ram_ctl::ENABLE);
    /// Entry is parity-checked on read.
    pub const PARITY_ENABLE: Self = Self(unit_ram_ctl::PARITY_ENABLE);
    /// Enabled and parity-checked.
    pub const ALL: Self = Self(unit_ram_ctl::ALL);
    /// No flags.
    pub const NONE: Self = Self(0);

    /// Flags from raw register bits (undefined bits dropped).
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & unit_ram_ctl::ALL)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flags with `other` cleared.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl Default for UnitRamCtl {
    fn default() -> Self {
        Self::ALL
    }
}

// ── RAM entry ────────────────────────────────────────────────────────────────

/// One hashed RAM entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RamEntry {
    mask: u128,
    data: u128,
    width: u32,
    vpn: u16,
    nibble_enable: u32,
    ctl: UnitRamCtl,
}

impl RamEntry {
    /// Entry comparing `width` bits, every nibble enabled, enabled and
    /// parity-checked.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `width` is outside `1..=128` or mask
    /// or data has bits above `width`.
    pub fn new(mask: u128, data: u128, width: u32, vpn: u16) -> Result<Self> {
        if width == 0 || width > MAX_MATCH_BITS {
            return Err(ExmError::config(format!(
                "entry width {width} outside 1..={MAX_MATCH_BITS}"
            )));
        }
        let limit = width_mask(width);
        if mask & !limit != 0 || data & !limit != 0 {
            return Err(ExmError::config(format!(
                "entry mask 0x{mask:x} / data 0x{data:x} wider than {width} bits"
            )));
        }
        Ok(Self {
            mask,
            data,
            width,
            vpn,
            nibble_enable: all_nibbles(width),
            ctl: UnitRamCtl::ALL,
        })
    }

    /// Entry from whole `match_mask` / `match_data` register words, low word
    /// first. Width is 32 bits per word.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the word counts differ or exceed four.
    pub fn from_words(mask_words: &[u32], data_words: &[u32], vpn: u16) -> Result<Self> {
        if mask_words.len() != data_words.len() {
            return Err(ExmError::config(format!(
                "match_mask has {} words, match_data has {}",
                mask_words.len(),
                data_words.len()
            )));
        }
        if mask_words.is_empty() || mask_words.len() > 4 {
            return Err(ExmError::config(format!(
                "{} match words, need 1..=4",
                mask_words.len()
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        let width = mask_words.len() as u32 * WORD_BITS;
        Self::new(layout::join_words(mask_words), layout::join_words(data_words), width, vpn)
    }

    /// Replace the nibble enables (`match_nibble_*_enable`).
    #[must_use]
    pub fn with_nibble_enable(mut self, enable: u32) -> Self {
        self.nibble_enable = enable & all_nibbles(self.width);
        self
    }

    /// Replace the `unit_ram_ctl` flags.
    #[must_use]
    pub fn with_ctl(mut self, ctl: UnitRamCtl) -> Self {
        self.ctl = ctl;
        self
    }

    /// Must-match bits.
    pub const fn mask(&self) -> u128 {
        self.mask
    }

    /// Match data.
    pub const fn data(&self) -> u128 {
        self.data
    }

    /// Compare width in bits.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Virtual page number handed downstream on a hit.
    pub const fn vpn(&self) -> u16 {
        self.vpn
    }

    /// Nibble enables.
    pub const fn nibble_enable(&self) -> u32 {
        self.nibble_enable
    }

    /// `unit_ram_ctl` flags.
    pub const fn ctl(&self) -> UnitRamCtl {
        self.ctl
    }

    /// True if the entry participates in lookups.
    pub const fn is_enabled(&self) -> bool {
        self.ctl.contains(UnitRamCtl::ENABLE)
    }

    /// Bits that take part in the compare.
    pub fn effective_mask(&self) -> u128 {
        self.mask & layout::nibble_mask(self.nibble_enable) & width_mask(self.width)
    }

    /// Apply the match rule to raw key bits (version checked by the caller).
    pub fn matches(&self, key_bits: u128) -> bool {
        let m = self.effective_mask();
        self.is_enabled() && (key_bits & m) == (self.data & m)
    }

    /// Drop the enables; mask and data stay as stale bits.
    fn disable(&mut self) {
        self.ctl = self.ctl.without(UnitRamCtl::ENABLE);
        self.nibble_enable = 0;
    }

    fn flip(&mut self, field: ParityField, bit: u32) {
        match field {
            ParityField::Mask => self.mask ^= 1 << bit,
            ParityField::Data => self.data ^= 1 << bit,
        }
    }
}

impl ParityFields for RamEntry {
    fn field_bits(&self, field: ParityField) -> u128 {
        match field {
            ParityField::Mask => self.mask,
            ParityField::Data => self.data,
        }
    }
}

fn all_nibbles(width: u32) -> u32 {
    let nibbles = width.div_ceil(4);
    if nibbles >= layout::hash_input::V2_NIBBLE_LANES {
        u32::MAX
    } else {
        (1 << nibbles) - 1
    }
}

// ── Hits ─────────────────────────────────────────────────────────────────────

/// Which structure produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitSource {
    /// Primary way `index`.
    Way(u8),
    /// Stash slot.
    Stash {
        /// Stash slot within the row.
        slot: u8,
        /// Way whose result bus the stash hit drives.
        result_bus_select: u8,
        /// Downstream input routing.
        input_data_ctl: u8,
    },
}

/// A matching entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hit {
    /// Producer.
    pub source: HitSource,
    /// Location the key hashed to (bank 0 for stash hits).
    pub coord: BankCoordinate,
    /// VPN stored with the entry.
    pub vpn: u16,
    /// Version the entry was read under.
    pub version: VersionTag,
}

// ── Way ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct Sealed<T> {
    pub(crate) entry: T,
    pub(crate) parity: ParityWord,
}

/// One way's hashed RAM.
#[derive(Debug, Clone)]
pub struct ExactMatchWay {
    index: u8,
    geometry: RamGeometry,
    match_width: u32,
    parity_groups: Vec<ParityGroup>,
    ram: VersionedArena<Sealed<RamEntry>>,
}

impl ExactMatchWay {
    /// Empty way comparing `match_width` bits.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `match_width` is outside `1..=128`.
    pub fn new(index: u8, geometry: RamGeometry, match_width: u32) -> Result<Self> {
        if match_width == 0 || match_width > MAX_MATCH_BITS {
            return Err(ExmError::config(format!(
                "way {index}: match width {match_width} outside 1..={MAX_MATCH_BITS}"
            )));
        }
        Ok(Self {
            index,
            geometry,
            match_width,
            parity_groups: Vec::new(),
            ram: VersionedArena::new(
                geometry.total_slots() as usize,
                geometry.version_count() as usize,
            ),
        })
    }

    /// Install parity groups; entries written afterwards are sealed with them.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for more than 32 groups, or a group
    /// covering bits beyond the match width.
    pub fn with_parity_groups(mut self, groups: Vec<ParityGroup>) -> Result<Self> {
        check_parity_groups(&groups, self.match_width)?;
        self.parity_groups = groups;
        Ok(self)
    }

    /// Way index.
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Compare width every entry must have.
    pub const fn match_width(&self) -> u32 {
        self.match_width
    }

    /// Parity groups.
    pub fn parity_groups(&self) -> &[ParityGroup] {
        &self.parity_groups
    }

    /// Write `entry` at `coord` for `version`, replacing the previous copy.
    ///
    /// # Errors
    ///
    /// Returns a range error for a coordinate or version outside the array,
    /// and a configuration error if the entry width differs from the way's.
    pub fn insert(&mut self, coord: BankCoordinate, entry: RamEntry, version: VersionTag) -> Result<()> {
        coord.check(&self.geometry)?;
        version.check(&self.geometry)?;
        if entry.width() != self.match_width {
            return Err(ExmError::config(format!(
                "way {}: entry is {} bits wide, way compares {}",
                self.index,
                entry.width(),
                self.match_width
            )));
        }
        let parity = ParityValidator::seal(&self.parity_groups, &entry);
        self.ram
            .set(coord.slot_index(&self.geometry), version, Sealed { entry, parity });
        debug!(
            "way {}: insert {coord} {version} mask=0x{:x} data=0x{:x} vpn=0x{:x}",
            self.index,
            entry.mask(),
            entry.data(),
            entry.vpn()
        );
        Ok(())
    }

    /// Look up `key` at `coord` under `active_version`, without parity.
    pub fn lookup(&self, coord: BankCoordinate, key: &MatchKey, active_version: VersionTag) -> Option<Hit> {
        self.lookup_checked(coord, key, active_version, &mut Vec::new())
    }

    /// Look up `key`, recomputing parity of the entry read. Parity errors
    /// are appended to `errors`; the match decision is still made.
    pub fn lookup_checked(
        &self,
        coord: BankCoordinate,
        key: &MatchKey,
        active_version: VersionTag,
        errors: &mut Vec<ParityError>,
    ) -> Option<Hit> {
        if coord.check(&self.geometry).is_err() {
            return None;
        }
        let sealed = self.ram.get(coord.slot_index(&self.geometry), active_version)?;
        let entry = &sealed.entry;
        if entry.is_enabled() && entry.ctl().contains(UnitRamCtl::PARITY_ENABLE) {
            errors.extend(ParityValidator::verify(&self.parity_groups, entry, sealed.parity, || {
                format!("way {} {coord} {active_version}", self.index)
            }));
        }
        if !entry.matches(key.bits()) {
            return None;
        }
        Some(Hit {
            source: HitSource::Way(self.index),
            coord,
            vpn: entry.vpn(),
            version: active_version,
        })
    }

    /// Entry stored at `coord` for `version`.
    pub fn entry(&self, coord: BankCoordinate, version: VersionTag) -> Option<&RamEntry> {
        if coord.check(&self.geometry).is_err() {
            return None;
        }
        self.ram
            .get(coord.slot_index(&self.geometry), version)
            .map(|s| &s.entry)
    }

    /// Clear the enables of every version at `coord`.
    ///
    /// # Errors
    ///
    /// Returns a range error for a coordinate outside the array.
    pub fn evict(&mut self, coord: BankCoordinate) -> Result<()> {
        coord.check(&self.geometry)?;
        for sealed in self.ram.slot_mut(coord.slot_index(&self.geometry)) {
            sealed.entry.disable();
        }
        debug!("way {}: evict {coord}", self.index);
        Ok(())
    }

    /// Disable every entry tagged `version`. Returns how many were enabled.
    pub fn retire(&mut self, version: VersionTag) -> usize {
        let mut n = 0;
        for sealed in self.ram.version_mut(version) {
            if sealed.entry.is_enabled() {
                n += 1;
            }
            sealed.entry.disable();
        }
        n
    }

    /// Enabled entries of `version`.
    pub fn occupancy(&self, version: VersionTag) -> usize {
        self.ram
            .iter()
            .filter(|(_, v, s)| *v == version && s.entry.is_enabled())
            .count()
    }

    /// Recompute parity of every enabled, parity-checked entry.
    pub fn scrub(&self, errors: &mut Vec<ParityError>) {
        for (slot, version, sealed) in self.ram.iter() {
            let entry = &sealed.entry;
            if !entry.is_enabled() || !entry.ctl().contains(UnitRamCtl::PARITY_ENABLE) {
                continue;
            }
            errors.extend(ParityValidator::verify(&self.parity_groups, entry, sealed.parity, || {
                format!("way {} slot {slot} {version}", self.index)
            }));
        }
    }

    /// Flip one stored bit without resealing parity.
    ///
    /// # Errors
    ///
    /// Returns a range error for an empty cell or a bit beyond the width.
    pub fn inject_fault(&mut self, coord: BankCoordinate, version: VersionTag, field: ParityField, bit: u32) -> Result<()> {
        coord.check(&self.geometry)?;
        if bit >= self.match_width {
            return Err(ExmError::range("bit", bit, self.match_width));
        }
        let slot = coord.slot_index(&self.geometry);
        let sealed = self
            .ram
            .get_mut(slot, version)
            .ok_or_else(|| ExmError::config(format!("way {}: no entry at {coord} {version}", self.index)))?;
        sealed.entry.flip(field, bit);
        Ok(())
    }
}

pub(crate) fn check_parity_groups(groups: &[ParityGroup], width: u32) -> Result<()> {
    if groups.len() > parity_group_mask::MAX_GROUPS {
        return Err(ExmError::config(format!(
            "{} parity groups, limit {}",
            groups.len(),
            parity_group_mask::MAX_GROUPS
        )));
    }
    if let Some(g) = groups.iter().find(|g| g.mask() & !width_mask(width) != 0) {
        return Err(ExmError::config(format!(
            "parity group '{}' covers bits beyond {width}",
            g.name()
        )));
    }
    Ok(())
}
