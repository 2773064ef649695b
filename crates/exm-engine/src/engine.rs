//! Engine state
//!
//! [`EngineState`] owns every piece of the lookup pipeline. It replaces a
//! flat register map: all mutation goes through typed calls, and the
//! active version is the only value lookups read from shared state.
//!
//! ```text
//! key ─┬─ hash(w0) ─ map ─ way 0 lookup ─┐
//!      ├─ hash(w1) ─ map ─ way 1 lookup ─┤
//!      │        ...                      ├─ resolve ─ Resolution
//!      └── (all ways miss) stash rows ───┘
//! ```

use crate::config::{EngineConfig, WayConfig};
use crate::error::{ExmError, Result};
use crate::hasher::{GaloisHasher, HashOutput};
use crate::ingress::ConfigWrite;
use crate::key::MatchKey;
use crate::mapper::{BankAddressMapper, BankCoordinate};
use crate::parity::{ParityError, ParityField, ParityGroup};
use crate::resolver::{MissDefaults, NextTableResolver, Resolution};
use crate::stash::{StashEntry, StashOverflow};
use crate::version::{VersionGate, VersionTag};
use crate::way::{ExactMatchWay, RamEntry};
use exm_chip::RamGeometry;
use tracing::{debug, info, warn};

/// A resolution plus every parity error seen while producing it.
#[derive(Debug, Clone)]
pub struct LookupOutcome {
    /// Best-effort result, valid even when parity errors were found.
    pub resolution: Resolution,
    /// Parity errors on entries read by this lookup.
    pub parity_errors: Vec<ParityError>,
}

impl LookupOutcome {
    /// True if no parity error was seen.
    pub fn is_clean(&self) -> bool {
        self.parity_errors.is_empty()
    }

    /// Treat parity errors as fatal.
    ///
    /// # Errors
    ///
    /// Returns the first parity error, if any.
    pub fn into_result(self) -> Result<Resolution> {
        match self.parity_errors.into_iter().next() {
            Some(e) => Err(ExmError::Parity(e)),
            None => Ok(self.resolution),
        }
    }
}

/// The whole exact-match unit.
#[derive(Debug)]
pub struct EngineState {
    config: EngineConfig,
    hasher: GaloisHasher,
    mapper: BankAddressMapper,
    ways: Vec<Option<ExactMatchWay>>,
    stash: StashOverflow,
    resolver: NextTableResolver,
    gate: VersionGate,
}

impl EngineState {
    /// Build an empty engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let geometry = config.geometry;
        let mut stash = StashOverflow::new(geometry)?;
        stash.set_parity_groups(config.stash_parity_groups.clone())?;
        let max_ways = usize::from(geometry.max_ways);
        info!(
            "exact-match engine: {}×{} array, {max_ways} ways, {} stash/row, {} versions",
            geometry.rows,
            geometry.banks,
            geometry.stash_slots,
            geometry.version_count()
        );
        Ok(Self {
            hasher: GaloisHasher::new(max_ways),
            mapper: BankAddressMapper::new(geometry),
            ways: (0..max_ways).map(|_| None).collect(),
            stash,
            resolver: NextTableResolver::new(geometry),
            gate: VersionGate::new(&geometry),
            config,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Array geometry.
    pub fn geometry(&self) -> &RamGeometry {
        &self.config.geometry
    }

    /// Miss defaults in effect.
    pub fn miss_defaults(&self) -> &MissDefaults {
        &self.config.miss_defaults
    }

    /// Configured way `way`, if any.
    pub fn way(&self, way: usize) -> Option<&ExactMatchWay> {
        self.ways.get(way)?.as_ref()
    }

    /// Indices of configured ways.
    pub fn configured_ways(&self) -> impl Iterator<Item = usize> + '_ {
        self.ways
            .iter()
            .enumerate()
            .filter_map(|(i, w)| w.as_ref().map(|_| i))
    }

    /// The stash.
    pub fn stash(&self) -> &StashOverflow {
        &self.stash
    }

    /// The resolver.
    pub fn resolver(&self) -> &NextTableResolver {
        &self.resolver
    }

    // ── Configuration ────────────────────────────────────────────────────

    /// Install (or reconfigure) way `way`.
    ///
    /// A reconfigured way keeps its entries, so its compare width and
    /// parity groups must stay the same. All parts are installed or none.
    ///
    /// # Errors
    ///
    /// Returns a range error for an unknown way and a configuration error
    /// for an inconsistent config or a change the way cannot absorb.
    pub fn configure_way(&mut self, way: usize, config: WayConfig) -> Result<()> {
        config.validate()?;
        let limit = self.ways.len();
        let index = u8::try_from(way)
            .ok()
            .filter(|_| way < limit)
            .ok_or_else(|| ExmError::range("way", way as u64, limit as u64))?;

        let fresh = match &self.ways[way] {
            Some(existing) => {
                if existing.match_width() != config.match_width
                    || existing.parity_groups() != config.parity_groups.as_slice()
                {
                    return Err(ExmError::config(format!(
                        "way {way} holds {}-bit entries; compare width and parity groups are fixed",
                        existing.match_width()
                    )));
                }
                None
            }
            None => Some(
                ExactMatchWay::new(index, self.config.geometry, config.match_width)?
                    .with_parity_groups(config.parity_groups.clone())?,
            ),
        };

        let mut hasher = self.hasher.clone();
        let mut mapper = self.mapper.clone();
        let mut resolver = self.resolver.clone();
        if let Err(e) = hasher
            .configure(way, config.matrix.clone(), config.layout)
            .and_then(|()| mapper.configure(way, config.address_layout))
            .and_then(|()| resolver.configure(way, config.route()))
        {
            warn!("way {way}: configuration refused: {e}");
            return Err(e);
        }
        if let Some(ram) = fresh {
            self.ways[way] = Some(ram);
        }
        self.hasher = hasher;
        self.mapper = mapper;
        self.resolver = resolver;
        info!(
            "way {way}: configured, {}-bit compare, {} parity groups, hit → {}",
            config.match_width,
            config.parity_groups.len(),
            config.next_table
        );
        Ok(())
    }

    /// Replace the miss defaults.
    pub fn set_miss_defaults(&mut self, miss_defaults: MissDefaults) {
        debug!("miss defaults → {}", miss_defaults.next_table);
        self.config.miss_defaults = miss_defaults;
    }

    /// Replace the stash parity groups.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for more than 32 groups.
    pub fn set_stash_parity_groups(&mut self, groups: Vec<ParityGroup>) -> Result<()> {
        self.stash.set_parity_groups(groups.clone())?;
        self.config.stash_parity_groups = groups;
        Ok(())
    }

    fn way_ref(&self, way: usize) -> Result<&ExactMatchWay> {
        self.ways
            .get(way)
            .ok_or_else(|| ExmError::range("way", way as u64, self.ways.len() as u64))?
            .as_ref()
            .ok_or_else(|| ExmError::config(format!("way {way} is not configured")))
    }

    fn way_mut(&mut self, way: usize) -> Result<&mut ExactMatchWay> {
        let limit = self.ways.len();
        self.ways
            .get_mut(way)
            .ok_or_else(|| ExmError::range("way", way as u64, limit as u64))?
            .as_mut()
            .ok_or_else(|| ExmError::config(format!("way {way} is not configured")))
    }

    // ── Hash path ────────────────────────────────────────────────────────

    /// Hash `key` for `way`.
    ///
    /// # Errors
    ///
    /// As [`GaloisHasher::hash`].
    pub fn hash(&self, way: usize, key: &MatchKey) -> Result<HashOutput> {
        self.hasher.hash(way, key)
    }

    /// Coordinate `key` hashes to in `way`.
    ///
    /// # Errors
    ///
    /// Configuration errors from the hasher, range errors from the mapper.
    pub fn locate(&self, way: usize, key: &MatchKey) -> Result<BankCoordinate> {
        self.mapper.map(way, self.hasher.hash(way, key)?)
    }

    // ── Entries ──────────────────────────────────────────────────────────

    /// Write `entry` at `coord` of `way` for `version`.
    ///
    /// # Errors
    ///
    /// Returns a range or configuration error from the way; nothing is
    /// written.
    pub fn insert(&mut self, way: usize, coord: BankCoordinate, entry: RamEntry, version: VersionTag) -> Result<()> {
        self.way_mut(way)?.insert(coord, entry, version)
    }

    /// Write `entry` where `key` hashes in `way`. Returns the coordinate.
    ///
    /// # Errors
    ///
    /// As [`EngineState::locate`] and [`EngineState::insert`].
    pub fn insert_key(
        &mut self,
        way: usize,
        key: &MatchKey,
        entry: RamEntry,
        version: VersionTag,
    ) -> Result<BankCoordinate> {
        let coord = self.locate(way, key)?;
        self.insert(way, coord, entry, version)?;
        Ok(coord)
    }

    /// Clear the enables at `coord` of `way`, every version.
    ///
    /// # Errors
    ///
    /// Returns a range error for an unknown way or coordinate.
    pub fn evict(&mut self, way: usize, coord: BankCoordinate) -> Result<()> {
        self.way_mut(way)?.evict(coord)
    }

    /// Write a stash slot.
    ///
    /// # Errors
    ///
    /// Returns a range error for a row, slot or version outside the stash.
    pub fn insert_stash(&mut self, row: u8, slot: u8, entry: StashEntry, version: VersionTag) -> Result<()> {
        self.stash.insert(row, slot, entry, version)
    }

    /// Clear a stash slot's `bank_enable`, every version.
    ///
    /// # Errors
    ///
    /// Returns a range error for a row or slot outside the stash.
    pub fn evict_stash(&mut self, row: u8, slot: u8) -> Result<()> {
        self.stash.evict(row, slot)
    }

    /// Enabled entries of `version` across all ways and the stash.
    pub fn occupancy(&self, version: VersionTag) -> usize {
        self.ways
            .iter()
            .flatten()
            .map(|w| w.occupancy(version))
            .sum::<usize>()
            + self.stash.occupancy(version)
    }

    // ── Versions ─────────────────────────────────────────────────────────

    /// Version lookups currently match against.
    pub fn active_version(&self) -> VersionTag {
        self.gate.active()
    }

    /// Version a reload should write.
    pub fn staged_version(&self) -> VersionTag {
        self.gate.staged()
    }

    /// Versions swapped so far.
    pub fn swap_count(&self) -> u64 {
        self.gate.swap_count()
    }

    /// Atomically make `version` active. Lookups already past their version
    /// read finish against the old version.
    ///
    /// Returns the previously active version.
    ///
    /// # Errors
    ///
    /// Returns a range error if `version` exceeds the version width.
    pub fn swap_active_version(&self, version: VersionTag) -> Result<VersionTag> {
        self.gate.swap_active_version(version)
    }

    /// Disable every entry of `version` in all ways and the stash. Returns
    /// how many enabled entries were dropped.
    ///
    /// # Errors
    ///
    /// Refuses the active version and versions outside the tag width.
    pub fn retire_version(&mut self, version: VersionTag) -> Result<usize> {
        version.check(&self.config.geometry)?;
        if version == self.gate.active() {
            return Err(ExmError::config(format!("refusing to retire active version {version}")));
        }
        let n = self
            .ways
            .iter_mut()
            .flatten()
            .map(|w| w.retire(version))
            .sum::<usize>()
            + self.stash.retire(version);
        info!("retired {version}: {n} entries disabled");
        Ok(n)
    }

    // ── Lookup ───────────────────────────────────────────────────────────

    /// Look `key` up in every configured way, then the stash.
    ///
    /// The active version is read once. Parity errors do not stop the
    /// lookup; they come back in the outcome.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `key` does not fit a way's matrix
    /// and a range error if a hash lands outside the array.
    pub fn lookup(&self, key: &MatchKey) -> Result<LookupOutcome> {
        let active = self.gate.active();
        let check = self.config.parity_on_read;
        let mut parity_errors = Vec::new();
        let mut hits = vec![None; self.ways.len()];
        let mut rows: Vec<u8> = Vec::new();

        for (i, way) in self.ways.iter().enumerate() {
            let Some(way) = way else { continue };
            let coord = self.locate(i, key)?;
            if !rows.contains(&coord.row) {
                rows.push(coord.row);
            }
            hits[i] = if check {
                way.lookup_checked(coord, key, active, &mut parity_errors)
            } else {
                way.lookup(coord, key, active)
            };
        }

        let stash_hit = if hits.iter().all(Option::is_none) {
            rows.iter().find_map(|&row| {
                if check {
                    self.stash.probe_checked(row, key, active, &mut parity_errors)
                } else {
                    self.stash.probe(row, key, active)
                }
            })
        } else {
            None
        };

        let resolution = self.resolver.resolve(&hits, stash_hit, &self.config.miss_defaults);
        debug!(
            "lookup 0x{:x} under {active}: hit_map=0b{:b} → {}",
            key.bits(),
            resolution.hit_map,
            resolution.next_table
        );
        Ok(LookupOutcome {
            resolution,
            parity_errors,
        })
    }

    // ── Integrity ────────────────────────────────────────────────────────

    /// Recompute parity of every enabled way entry and stash slot.
    pub fn scrub(&self) -> Vec<ParityError> {
        let mut errors = Vec::new();
        for way in self.ways.iter().flatten() {
            way.scrub(&mut errors);
        }
        self.stash.scrub(&mut errors);
        if errors.is_empty() {
            debug!("scrub: clean");
        } else {
            warn!("scrub: {} parity errors", errors.len());
        }
        errors
    }

    /// Flip one stored bit of a way entry without resealing parity.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown way, empty cell or out-of-range bit.
    pub fn inject_fault(
        &mut self,
        way: usize,
        coord: BankCoordinate,
        version: VersionTag,
        field: ParityField,
        bit: u32,
    ) -> Result<()> {
        self.way_mut(way)?.inject_fault(coord, version, field, bit)?;
        debug!("way {way}: injected {field:?} bit {bit} flip at {coord} {version}");
        Ok(())
    }

    /// Flip one stored bit of a stash slot without resealing parity.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty cell or out-of-range position.
    pub fn inject_stash_fault(
        &mut self,
        row: u8,
        slot: u8,
        version: VersionTag,
        field: ParityField,
        bit: u32,
    ) -> Result<()> {
        self.stash.inject_fault(row, slot, version, field, bit)?;
        debug!("stash r{row}s{slot}: injected {field:?} bit {bit} flip at {version}");
        Ok(())
    }

    // ── Ingress ──────────────────────────────────────────────────────────

    /// Apply one configuration write.
    ///
    /// # Errors
    ///
    /// Whatever the underlying call returns.
    pub fn apply(&mut self, write: ConfigWrite) -> Result<()> {
        debug!("apply {}", write.kind());
        match write {
            ConfigWrite::ConfigureWay { way, config } => self.configure_way(usize::from(way), config),
            ConfigWrite::InsertEntry { way, coord, entry, version } => {
                self.insert(usize::from(way), coord, entry, version)
            }
            ConfigWrite::EvictEntry { way, coord } => self.evict(usize::from(way), coord),
            ConfigWrite::InsertStash { row, slot, entry, version } => {
                self.insert_stash(row, slot, entry, version)
            }
            ConfigWrite::EvictStash { row, slot } => self.evict_stash(row, slot),
            ConfigWrite::StashParity(groups) => self.set_stash_parity_groups(groups),
            ConfigWrite::MissDefaults(d) => {
                self.set_miss_defaults(d);
                Ok(())
            }
            ConfigWrite::SwapVersion(v) => self.swap_active_version(v).map(|_| ()),
            ConfigWrite::RetireVersion(v) => self.retire_version(v).map(|_| ()),
        }
    }

    /// Apply writes in order, stopping at the first failure. Returns how
    /// many were applied.
    ///
    /// # Errors
    ///
    /// The first failing write's error.
    pub fn replay(&mut self, writes: impl IntoIterator<Item = ConfigWrite>) -> Result<usize> {
        let mut n = 0;
        for write in writes {
            self.apply(write)?;
            n += 1;
        }
        info!("replayed {n} config writes");
        Ok(n)
    }

    /// Matrix dimensions of `way` as `(output, input)` bits.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown or unconfigured way.
    pub fn matrix_shape(&self, way: usize) -> Result<(u32, u32)> {
        self.way_ref(way)?;
        self.hasher
            .matrix(way)
            .map(|m| (m.output_width(), m.input_width()))
            .ok_or_else(|| ExmError::config(format!("way {way} has no galois matrix")))
    }
}
