//! Next-table resolution
//!
//! Picks the winning hit and turns it into a next-table identifier and the
//! five downstream addresses.
//!
//! Priority: lowest way index with a hit, else the stash hit, else miss.
//!
//! ```text
//! hit:   adr[k] = ((match_address >> exact_shiftcount[k]) & mask[k]) | default[k]
//! miss:  adr[k] = miss_value[k]
//! ```
//!
//! `match_address` is the `{vpn, row, bank}` word of the hit. Logical tables
//! sharing physical rows read their fields at different shift counts.

use crate::error::{ExmError, Result};
use crate::way::{Hit, HitSource};
use exm_chip::layout::adr;
use exm_chip::RamGeometry;
use tracing::debug;

/// The five resolved address outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Instruction address.
    Instr,
    /// Action data address.
    ActionData,
    /// Statistics address.
    Stats,
    /// Meter address.
    Meter,
    /// Idle-time address.
    IdleTime,
}

impl AddressKind {
    /// Every kind, in output order.
    pub const ALL: [Self; adr::KINDS] = [
        Self::Instr,
        Self::ActionData,
        Self::Stats,
        Self::Meter,
        Self::IdleTime,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Register stem name.
    pub const fn register_name(self) -> &'static str {
        adr::NAMES[self.index()]
    }
}

/// `*_adr_miss_value` / `*_adr_mask` / `*_adr_default` for one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressDefault {
    /// Output on miss.
    pub miss_value: u32,
    /// Mask applied to the shifted match address on hit.
    pub mask: u32,
    /// Bits ORed in on hit.
    pub default: u32,
}

/// Miss path configuration: next table and all five address triples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MissDefaults {
    /// Next table on miss.
    pub next_table: NextTableId,
    slots: [AddressDefault; adr::KINDS],
}

impl MissDefaults {
    /// Miss defaults with every triple zero.
    pub fn new(next_table: NextTableId) -> Self {
        Self {
            next_table,
            slots: [AddressDefault::default(); adr::KINDS],
        }
    }

    /// Set the triple for `kind`.
    #[must_use]
    pub fn with(mut self, kind: AddressKind, value: AddressDefault) -> Self {
        self.slots[kind.index()] = value;
        self
    }

    /// Triple for `kind`.
    pub fn get(&self, kind: AddressKind) -> &AddressDefault {
        &self.slots[kind.index()]
    }
}

/// `exact_shiftcount` for each address output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShiftCounts([u8; adr::KINDS]);

impl ShiftCounts {
    /// Shift counts in [`AddressKind::ALL`] order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a shift past bit 63.
    pub fn new(counts: [u8; adr::KINDS]) -> Result<Self> {
        if let Some((i, &c)) = counts.iter().enumerate().find(|(_, &c)| c > adr::MAX_SHIFTCOUNT) {
            return Err(ExmError::config(format!(
                "exact_shiftcount for {} is {c}, limit {}",
                adr::NAMES[i],
                adr::MAX_SHIFTCOUNT
            )));
        }
        Ok(Self(counts))
    }

    /// Shift for `kind`.
    pub const fn get(&self, kind: AddressKind) -> u8 {
        self.0[kind.index()]
    }
}

/// Logical next-table identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NextTableId(pub u8);

impl std::fmt::Display for NextTableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table {}", self.0)
    }
}

/// Per-way hit routing: next table and shift counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WayRoute {
    /// Next table when this way (or a stash slot selecting its bus) hits.
    pub next_table: NextTableId,
    /// Shift counts for this way's result bus.
    pub shiftcounts: ShiftCounts,
}

/// Resolved address outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedAddresses([u32; adr::KINDS]);

impl ResolvedAddresses {
    /// Address for `kind`.
    pub const fn get(&self, kind: AddressKind) -> u32 {
        self.0[kind.index()]
    }
}

/// Winner of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A way or the stash matched.
    Hit(Hit),
    /// Nothing matched.
    Miss,
}

/// Result handed to downstream action and statistics stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Winning hit or miss.
    pub outcome: Outcome,
    /// Next logical table.
    pub next_table: NextTableId,
    /// Resolved addresses.
    pub addresses: ResolvedAddresses,
    /// Bit `i` set if way `i` hit.
    pub hit_map: u32,
}

impl Resolution {
    /// The winning hit, if any.
    pub const fn hit(&self) -> Option<&Hit> {
        match &self.outcome {
            Outcome::Hit(h) => Some(h),
            Outcome::Miss => None,
        }
    }

    /// True if nothing matched.
    pub const fn is_miss(&self) -> bool {
        matches!(self.outcome, Outcome::Miss)
    }
}

/// Chooses the winning hit and computes downstream addresses.
#[derive(Debug, Clone)]
pub struct NextTableResolver {
    geometry: RamGeometry,
    routes: Vec<WayRoute>,
}

impl NextTableResolver {
    /// Resolver for `geometry`, all routes defaulted.
    pub fn new(geometry: RamGeometry) -> Self {
        Self {
            geometry,
            routes: vec![WayRoute::default(); usize::from(geometry.max_ways)],
        }
    }

    /// Install the route for `way`.
    ///
    /// # Errors
    ///
    /// Returns a range error for an unknown way.
    pub fn configure(&mut self, way: usize, route: WayRoute) -> Result<()> {
        let limit = self.routes.len();
        let slot = self
            .routes
            .get_mut(way)
            .ok_or_else(|| ExmError::range("way", way as u64, limit as u64))?;
        *slot = route;
        Ok(())
    }

    /// Route of `way`.
    pub fn route(&self, way: usize) -> Option<&WayRoute> {
        self.routes.get(way)
    }

    /// Pick the winner among per-way hits (index = way), the stash hit and
    /// the miss defaults.
    pub fn resolve(&self, hits: &[Option<Hit>], stash_hit: Option<Hit>, miss_defaults: &MissDefaults) -> Resolution {
        let hit_map = hits
            .iter()
            .enumerate()
            .take(32)
            .filter(|(_, h)| h.is_some())
            .fold(0u32, |acc, (i, _)| acc | (1 << i));

        let winner = hits.iter().flatten().next().copied().or(stash_hit);

        let Some(hit) = winner else {
            let mut addresses = ResolvedAddresses::default();
            for kind in AddressKind::ALL {
                addresses.0[kind.index()] = miss_defaults.get(kind).miss_value;
            }
            debug!("resolve: miss → {}", miss_defaults.next_table);
            return Resolution {
                outcome: Outcome::Miss,
                next_table: miss_defaults.next_table,
                addresses,
                hit_map,
            };
        };

        let bus = match hit.source {
            HitSource::Way(w) => usize::from(w),
            HitSource::Stash { result_bus_select, .. } => usize::from(result_bus_select),
        };
        let route = self.routes.get(bus).copied().unwrap_or_default();
        let match_address = self.geometry.match_address(hit.vpn, hit.coord.row, hit.coord.bank);

        let mut addresses = ResolvedAddresses::default();
        for kind in AddressKind::ALL {
            let d = miss_defaults.get(kind);
            #[allow(clippy::cast_possible_truncation)]
            let shifted = (match_address >> route.shiftcounts.get(kind)) as u32;
            addresses.0[kind.index()] = (shifted & d.mask) | d.default;
        }
        debug!(
            "resolve: {:?} vpn=0x{:x} → {} (match address 0x{match_address:x})",
            hit.source, hit.vpn, route.next_table
        );
        Resolution {
            outcome: Outcome::Hit(hit),
            next_table: route.next_table,
            addresses,
            hit_map,
        }
    }
}
