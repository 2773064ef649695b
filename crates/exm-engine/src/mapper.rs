//! Hash-to-bank address mapping
//!
//! Slices a way's hash output into row-select, bank-select and VPN fields
//! per its `unitram_config` layout. Hash outputs wider than one word arrive
//! as `ram_address_mux` words and are reassembled low word first before
//! slicing.

use crate::error::{ExmError, Result};
use crate::hasher::HashOutput;
use exm_chip::layout::{UnitRamLayout, MAX_HASH_BITS};
use exm_chip::RamGeometry;
use tracing::debug;

/// Location of a candidate entry in the rows × banks array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BankCoordinate {
    /// SRAM row.
    pub row: u8,
    /// Bank within the row.
    pub bank: u8,
    /// Virtual page number sliced from the hash.
    pub vpn: u16,
}

impl BankCoordinate {
    /// New coordinate.
    pub const fn new(row: u8, bank: u8, vpn: u16) -> Self {
        Self { row, bank, vpn }
    }

    /// Check the coordinate lies inside `geometry`.
    ///
    /// # Errors
    ///
    /// Returns a range error naming the overflowing coordinate.
    pub fn check(&self, geometry: &RamGeometry) -> Result<()> {
        if self.row >= geometry.rows {
            return Err(ExmError::range("row", self.row, geometry.rows));
        }
        if self.bank >= geometry.banks {
            return Err(ExmError::range("bank", self.bank, geometry.banks));
        }
        Ok(())
    }

    /// Flat arena index (`row × banks + bank`).
    pub(crate) fn slot_index(&self, geometry: &RamGeometry) -> usize {
        usize::from(self.row) * usize::from(geometry.banks) + usize::from(self.bank)
    }
}

impl std::fmt::Display for BankCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}b{}/vpn 0x{:x}", self.row, self.bank, self.vpn)
    }
}

/// Per-way hash slicer.
#[derive(Debug, Clone)]
pub struct BankAddressMapper {
    geometry: RamGeometry,
    layouts: Vec<Option<UnitRamLayout>>,
}

impl BankAddressMapper {
    /// Mapper for `geometry` with no way layouts installed.
    pub fn new(geometry: RamGeometry) -> Self {
        Self {
            geometry,
            layouts: vec![None; usize::from(geometry.max_ways)],
        }
    }

    /// Install the `unitram_config` layout for `way`.
    ///
    /// # Errors
    ///
    /// Returns a range error for an unknown way, or a configuration error if
    /// a field is wider than its coordinate or reads past bit 64.
    pub fn configure(&mut self, way: usize, layout: UnitRamLayout) -> Result<()> {
        let limit = self.layouts.len();
        let slot = self
            .layouts
            .get_mut(way)
            .ok_or_else(|| ExmError::range("way", way as u64, limit as u64))?;
        if layout.row_select.width > 8 || layout.bank_select.width > 8 {
            return Err(ExmError::config(format!(
                "way {way}: row/bank select wider than 8 bits ({}/{})",
                layout.row_select.width, layout.bank_select.width
            )));
        }
        if layout.vpn.width > 16 {
            return Err(ExmError::config(format!(
                "way {way}: vpn field is {} bits, limit 16",
                layout.vpn.width
            )));
        }
        if layout.required_hash_bits() > MAX_HASH_BITS {
            return Err(ExmError::config(format!(
                "way {way}: layout reads hash bit {}, limit {MAX_HASH_BITS}",
                layout.required_hash_bits()
            )));
        }
        *slot = Some(layout);
        Ok(())
    }

    /// Layout installed for `way`, if any.
    pub fn layout(&self, way: usize) -> Option<&UnitRamLayout> {
        self.layouts.get(way)?.as_ref()
    }

    /// Slice `hash` into a bank coordinate for `way`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the way has no layout or the hash is
    /// narrower than the layout reads, and a range error if the row or bank
    /// index exceeds the array.
    pub fn map(&self, way: usize, hash: HashOutput) -> Result<BankCoordinate> {
        let layout = self
            .layout(way)
            .ok_or_else(|| ExmError::config(format!("way {way} has no unitram layout")))?;
        if layout.required_hash_bits() > hash.width() {
            return Err(ExmError::config(format!(
                "way {way}: layout reads {} hash bits, hash is {} bits",
                layout.required_hash_bits(),
                hash.width()
            )));
        }
        let h = hash.value();
        let row = layout.row_select.extract(h);
        let bank = layout.bank_select.extract(h);
        let vpn = layout.vpn.extract(h);

        if row >= u64::from(self.geometry.rows) {
            return Err(ExmError::range("row", row, self.geometry.rows));
        }
        if bank >= u64::from(self.geometry.banks) {
            return Err(ExmError::range("bank", bank, self.geometry.banks));
        }

        #[allow(clippy::cast_possible_truncation)]
        let coord = BankCoordinate::new(row as u8, bank as u8, vpn as u16);
        debug!("way {way}: hash 0x{h:x} → {coord}");
        Ok(coord)
    }

    /// Reassemble `ram_address_mux` words (low word first) and map them.
    ///
    /// # Errors
    ///
    /// As [`HashOutput::from_mux_words`] and [`BankAddressMapper::map`].
    pub fn map_mux_words(&self, way: usize, words: &[u32], width: u32) -> Result<BankCoordinate> {
        self.map(way, HashOutput::from_mux_words(words, width)?)
    }
}
