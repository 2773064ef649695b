//! Entry versioning and the active-version gate
//!
//! Every slot keeps one shadow copy per version tag. A table reload writes
//! the staged version while lookups keep reading the active one, then
//! flips the gate in a single store ("make before break"). Retiring the old
//! version afterwards is the "break".
//!
//! Lookups read the active version exactly once, so a lookup never mixes
//! entries of two versions.

use crate::error::{ExmError, Result};
use exm_chip::RamGeometry;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tracing::info;

/// Version discriminator attached to every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct VersionTag(u8);

impl VersionTag {
    /// Version 0.
    pub const ZERO: Self = Self(0);

    /// New tag. Range is checked against the geometry on use.
    pub const fn new(v: u8) -> Self {
        Self(v)
    }

    /// Raw value.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Check the tag fits `geometry.version_bits`.
    ///
    /// # Errors
    ///
    /// Returns a range error if the tag does not fit.
    pub fn check(self, geometry: &RamGeometry) -> Result<()> {
        let count = geometry.version_count();
        if u32::from(self.0) >= count {
            return Err(ExmError::range("version", self.0, count));
        }
        Ok(())
    }
}

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ── Gate ─────────────────────────────────────────────────────────────────────

/// Holds the active version as one atomically swapped value.
#[derive(Debug)]
pub struct VersionGate {
    active: AtomicU8,
    count: u32,
    swaps: AtomicU64,
}

impl VersionGate {
    /// Gate for `geometry`, starting at version 0.
    pub fn new(geometry: &RamGeometry) -> Self {
        Self {
            active: AtomicU8::new(0),
            count: geometry.version_count(),
            swaps: AtomicU64::new(0),
        }
    }

    /// Snapshot of the active version. Read once per lookup.
    pub fn active(&self) -> VersionTag {
        VersionTag(self.active.load(Ordering::Acquire))
    }

    /// The version a reload should write: the one after the active version.
    pub fn staged(&self) -> VersionTag {
        let next = (u32::from(self.active().0) + 1) % self.count;
        #[allow(clippy::cast_possible_truncation)]
        let next = next as u8;
        VersionTag(next)
    }

    /// Make `new_version` visible to all subsequent lookups.
    ///
    /// Returns the previously active version.
    ///
    /// # Errors
    ///
    /// Returns a range error if `new_version` exceeds the version width.
    pub fn swap_active_version(&self, new_version: VersionTag) -> Result<VersionTag> {
        if u32::from(new_version.0) >= self.count {
            return Err(ExmError::range("version", new_version.0, self.count));
        }
        let old = VersionTag(self.active.swap(new_version.0, Ordering::AcqRel));
        let n = self.swaps.fetch_add(1, Ordering::Relaxed) + 1;
        info!("active version {old} → {new_version} (swap #{n})");
        Ok(old)
    }

    /// Number of swaps performed.
    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }
}

// ── Versioned arena ──────────────────────────────────────────────────────────

/// Fixed-size arena of `slots × versions` cells.
#[derive(Debug, Clone)]
pub(crate) struct VersionedArena<T> {
    versions: usize,
    cells: Vec<Option<T>>,
}

impl<T> VersionedArena<T> {
    pub(crate) fn new(slots: usize, versions: usize) -> Self {
        let mut cells = Vec::with_capacity(slots * versions);
        cells.resize_with(slots * versions, || None);
        Self { versions, cells }
    }

    fn cell(&self, slot: usize, version: VersionTag) -> usize {
        slot * self.versions + usize::from(version.0)
    }

    pub(crate) fn get(&self, slot: usize, version: VersionTag) -> Option<&T> {
        self.cells.get(self.cell(slot, version))?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, slot: usize, version: VersionTag) -> Option<&mut T> {
        let i = self.cell(slot, version);
        self.cells.get_mut(i)?.as_mut()
    }

    /// Replace the cell wholesale.
    pub(crate) fn set(&mut self, slot: usize, version: VersionTag, value: T) {
        let i = self.cell(slot, version);
        if let Some(cell) = self.cells.get_mut(i) {
            *cell = Some(value);
        }
    }

    /// All versions of one slot.
    pub(crate) fn slot_mut(&mut self, slot: usize) -> impl Iterator<Item = &mut T> {
        let start = slot * self.versions;
        let end = (start + self.versions).min(self.cells.len());
        self.cells[start.min(end)..end].iter_mut().flatten()
    }

    /// Every populated cell as `(slot, version, value)`.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, VersionTag, &T)> {
        let versions = self.versions;
        self.cells.iter().enumerate().filter_map(move |(i, c)| {
            #[allow(clippy::cast_possible_truncation)]
            let version = VersionTag((i % versions) as u8);
            c.as_ref().map(|v| (i / versions, version, v))
        })
    }

    /// Every populated cell of one version, mutably.
    pub(crate) fn version_mut(&mut self, version: VersionTag) -> impl Iterator<Item = &mut T> {
        let versions = self.versions;
        let v = usize::from(version.0);
        self.cells
            .iter_mut()
            .enumerate()
            .filter(move |(i, _)| i % versions == v)
            .filter_map(|(_, c)| c.as_mut())
    }
}
