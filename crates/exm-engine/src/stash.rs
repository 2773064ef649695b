//! Stash overflow
//!
//! Each physical row owns a few fully-associative stash slots that catch
//! keys whose hashed locations collided. The stash is probed only after
//! every primary way missed; the lowest-numbered enabled slot wins.
//!
//! Stash comparators are four words (128 bits) wide, twice the reference
//! way width, so narrower keys are zero-extended for the compare.
//! `result_bus_select` and `input_data_ctl` only route the hit downstream.

use crate::error::{ExmError, Result};
use crate::key::MatchKey;
use crate::mapper::BankCoordinate;
use crate::parity::{ParityError, ParityField, ParityFields, ParityGroup, ParityValidator};
use crate::version::{VersionTag, VersionedArena};
use crate::way::{check_parity_groups, Hit, HitSource, Sealed};
use exm_chip::layout::{self, stash, MAX_MATCH_BITS, STASH_MATCH_WORDS};
use exm_chip::RamGeometry;
use tracing::debug;

/// One stash slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StashEntry {
    match_mask: u128,
    match_data: u128,
    vpn: u16,
    bank_enable: bool,
    input_data_ctl: u8,
    result_bus_select: u8,
}

impl StashEntry {
    /// Enabled slot routing to result bus 0 with full-key input.
    pub const fn new(match_mask: u128, match_data: u128, vpn: u16) -> Self {
        Self {
            match_mask,
            match_data,
            vpn,
            bank_enable: true,
            input_data_ctl: stash::INPUT_FULL_KEY,
            result_bus_select: 0,
        }
    }

    /// Slot from `stash_match_mask` / `stash_match_data` words, low word first.
    pub fn from_words(
        mask_words: [u32; STASH_MATCH_WORDS],
        data_words: [u32; STASH_MATCH_WORDS],
        vpn: u16,
    ) -> Self {
        Self::new(layout::join_words(&mask_words), layout::join_words(&data_words), vpn)
    }

    /// Set the downstream routing fields.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either value exceeds its field.
    pub fn with_routing(mut self, result_bus_select: u8, input_data_ctl: u8) -> Result<Self> {
        if u32::from(result_bus_select) >= 1 << stash::RESULT_BUS_SELECT_BITS {
            return Err(ExmError::config(format!(
                "result_bus_select {result_bus_select} exceeds {} bits",
                stash::RESULT_BUS_SELECT_BITS
            )));
        }
        if input_data_ctl > stash::INPUT_HIGH_HALF {
            return Err(ExmError::config(format!(
                "input_data_ctl {input_data_ctl} undefined"
            )));
        }
        self.result_bus_select = result_bus_select;
        self.input_data_ctl = input_data_ctl;
        Ok(self)
    }

    /// Clear or set `bank_enable`.
    #[must_use]
    pub const fn with_bank_enable(mut self, enable: bool) -> Self {
        self.bank_enable = enable;
        self
    }

    /// Must-match bits.
    pub const fn match_mask(&self) -> u128 {
        self.match_mask
    }

    /// Match data.
    pub const fn match_data(&self) -> u128 {
        self.match_data
    }

    /// VPN handed downstream on a hit.
    pub const fn vpn(&self) -> u16 {
        self.vpn
    }

    /// Slot participates in probes.
    pub const fn bank_enable(&self) -> bool {
        self.bank_enable
    }

    /// Downstream input routing.
    pub const fn input_data_ctl(&self) -> u8 {
        self.input_data_ctl
    }

    /// Result bus driven on a hit.
    pub const fn result_bus_select(&self) -> u8 {
        self.result_bus_select
    }

    /// Same mask/data rule as a way entry, over 128 bits.
    pub const fn matches(&self, key_bits: u128) -> bool {
        self.bank_enable && (key_bits & self.match_mask) == (self.match_data & self.match_mask)
    }

    fn flip(&mut self, field: ParityField, bit: u32) {
        match field {
            ParityField::Mask => self.match_mask ^= 1 << bit,
            ParityField::Data => self.match_data ^= 1 << bit,
        }
    }
}

impl ParityFields for StashEntry {
    fn field_bits(&self, field: ParityField) -> u128 {
        match field {
            ParityField::Mask => self.match_mask,
            ParityField::Data => self.match_data,
        }
    }
}

/// Per-row stash array.
#[derive(Debug, Clone)]
pub struct StashOverflow {
    geometry: RamGeometry,
    parity_groups: Vec<ParityGroup>,
    slots: VersionedArena<Sealed<StashEntry>>,
}

impl StashOverflow {
    /// Empty stash for `geometry`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the stash is deeper than the row
    /// comparators allow.
    pub fn new(geometry: RamGeometry) -> Result<Self> {
        if geometry.stash_slots > RamGeometry::MAX_STASH_SLOTS {
            return Err(ExmError::config(format!(
                "{} stash slots per row, limit {}",
                geometry.stash_slots,
                RamGeometry::MAX_STASH_SLOTS
            )));
        }
        Ok(Self {
            geometry,
            parity_groups: Vec::new(),
            slots: VersionedArena::new(
                geometry.total_stash_slots() as usize,
                geometry.version_count() as usize,
            ),
        })
    }

    /// Install parity groups for slots written afterwards.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for more than 32 groups.
    pub fn set_parity_groups(&mut self, groups: Vec<ParityGroup>) -> Result<()> {
        check_parity_groups(&groups, MAX_MATCH_BITS)?;
        self.parity_groups = groups;
        Ok(())
    }

    fn index(&self, row: u8, slot: u8) -> Result<usize> {
        if row >= self.geometry.rows {
            return Err(ExmError::range("stash row", row, self.geometry.rows));
        }
        if slot >= self.geometry.stash_slots {
            return Err(ExmError::range("stash slot", slot, self.geometry.stash_slots));
        }
        Ok(usize::from(row) * usize::from(self.geometry.stash_slots) + usize::from(slot))
    }

    /// Write `entry` at (`row`, `slot`) for `version`.
    ///
    /// # Errors
    ///
    /// Returns a range error for a row, slot or version outside the stash.
    pub fn insert(&mut self, row: u8, slot: u8, entry: StashEntry, version: VersionTag) -> Result<()> {
        let i = self.index(row, slot)?;
        version.check(&self.geometry)?;
        let parity = ParityValidator::seal(&self.parity_groups, &entry);
        self.slots.set(i, version, Sealed { entry, parity });
        debug!(
            "stash r{row}s{slot}: insert {version} mask=0x{:x} data=0x{:x}",
            entry.match_mask, entry.match_data
        );
        Ok(())
    }

    /// Clear `bank_enable` of every version at (`row`, `slot`).
    ///
    /// # Errors
    ///
    /// Returns a range error for a row or slot outside the stash.
    pub fn evict(&mut self, row: u8, slot: u8) -> Result<()> {
        let i = self.index(row, slot)?;
        for sealed in self.slots.slot_mut(i) {
            sealed.entry.bank_enable = false;
        }
        debug!("stash r{row}s{slot}: evict");
        Ok(())
    }

    /// Probe `row` for `key` without parity checking.
    pub fn probe(&self, row: u8, key: &MatchKey, active_version: VersionTag) -> Option<Hit> {
        self.probe_checked(row, key, active_version, &mut Vec::new())
    }

    /// Probe `row` for `key`; the lowest enabled matching slot wins. Parity of
    /// every enabled slot read is recomputed into `errors`.
    pub fn probe_checked(
        &self,
        row: u8,
        key: &MatchKey,
        active_version: VersionTag,
        errors: &mut Vec<ParityError>,
    ) -> Option<Hit> {
        if row >= self.geometry.rows {
            return None;
        }
        for slot in 0..self.geometry.stash_slots {
            let i = usize::from(row) * usize::from(self.geometry.stash_slots) + usize::from(slot);
            let Some(sealed) = self.slots.get(i, active_version) else {
                continue;
            };
            let entry = &sealed.entry;
            if !entry.bank_enable {
                continue;
            }
            errors.extend(ParityValidator::verify(&self.parity_groups, entry, sealed.parity, || {
                format!("stash r{row}s{slot} {active_version}")
            }));
            if entry.matches(key.bits()) {
                debug!("stash r{row}s{slot}: hit vpn=0x{:x}", entry.vpn);
                return Some(Hit {
                    source: HitSource::Stash {
                        slot,
                        result_bus_select: entry.result_bus_select,
                        input_data_ctl: entry.input_data_ctl,
                    },
                    coord: BankCoordinate::new(row, 0, 0),
                    vpn: entry.vpn,
                    version: active_version,
                });
            }
        }
        None
    }

    /// Disable every slot tagged `version`. Returns how many were enabled.
    pub fn retire(&mut self, version: VersionTag) -> usize {
        let mut n = 0;
        for sealed in self.slots.version_mut(version) {
            if sealed.entry.bank_enable {
                n += 1;
            }
            sealed.entry.bank_enable = false;
        }
        n
    }

    /// Enabled slots of `version`.
    pub fn occupancy(&self, version: VersionTag) -> usize {
        self.slots
            .iter()
            .filter(|(_, v, s)| *v == version && s.entry.bank_enable)
            .count()
    }

    /// Recompute parity of every enabled slot.
    pub fn scrub(&self, errors: &mut Vec<ParityError>) {
        let depth = usize::from(self.geometry.stash_slots);
        for (i, version, sealed) in self.slots.iter() {
            if !sealed.entry.bank_enable {
                continue;
            }
            errors.extend(ParityValidator::verify(&self.parity_groups, &sealed.entry, sealed.parity, || {
                format!("stash r{}s{} {version}", i / depth, i % depth)
            }));
        }
    }

    /// Flip one stored bit without resealing parity.
    ///
    /// # Errors
    ///
    /// Returns a range error for an empty cell or a bit beyond 128.
    pub fn inject_fault(&mut self, row: u8, slot: u8, version: VersionTag, field: ParityField, bit: u32) -> Result<()> {
        let i = self.index(row, slot)?;
        if bit >= MAX_MATCH_BITS {
            return Err(ExmError::range("bit", bit, MAX_MATCH_BITS));
        }
        let sealed = self
            .slots
            .get_mut(i, version)
            .ok_or_else(|| ExmError::config(format!("stash r{row}s{slot}: no entry at {version}")))?;
        sealed.entry.flip(field, bit);
        Ok(())
    }
}
