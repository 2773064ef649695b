//! Config-write journal
//!
//! A compact binary record of [`ConfigWrite`] sequences so a harness can
//! capture a configuration transaction and replay it later.
//!
//! ```text
//! "EXMJ" | format u8 | record*
//! record  = opcode u8 | payload (little-endian)
//! ```
//!
//! Every decoded value passes through the same constructors the typed API
//! uses, so a journal can never smuggle in an entry the engine would refuse.

use crate::config::WayConfig;
use crate::error::{ExmError, Result};
use crate::hasher::{GaloisMatrix, HashLayout};
use crate::ingress::ConfigWrite;
use crate::mapper::BankCoordinate;
use crate::parity::{ParityField, ParityGroup};
use crate::resolver::{AddressDefault, AddressKind, MissDefaults, NextTableId, ShiftCounts};
use crate::stash::StashEntry;
use crate::version::VersionTag;
use crate::way::{RamEntry, UnitRamCtl};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use exm_chip::layout::{adr, hash_input, FieldSlice, UnitRamLayout};
use std::path::Path;
use tracing::{debug, info};

/// Journal magic bytes.
pub const MAGIC: [u8; 4] = *b"EXMJ";

/// Current journal format.
pub const FORMAT_VERSION: u8 = 1;

mod op {
    pub const CONFIGURE_WAY: u8 = 0x01;
    pub const INSERT_ENTRY: u8 = 0x02;
    pub const EVICT_ENTRY: u8 = 0x03;
    pub const INSERT_STASH: u8 = 0x04;
    pub const EVICT_STASH: u8 = 0x05;
    pub const STASH_PARITY: u8 = 0x06;
    pub const MISS_DEFAULTS: u8 = 0x07;
    pub const SWAP_VERSION: u8 = 0x08;
    pub const RETIRE_VERSION: u8 = 0x09;
}

const LAYOUT_V1: u8 = 1;
const LAYOUT_V2: u8 = 2;

// ── Encode ───────────────────────────────────────────────────────────────────

/// Encode `writes` with header.
pub fn encode(writes: &[ConfigWrite]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + writes.len() * 48);
    buf.put_slice(&MAGIC);
    buf.put_u8(FORMAT_VERSION);
    for w in writes {
        put_write(&mut buf, w);
    }
    debug!("journal: encoded {} writes into {} bytes", writes.len(), buf.len());
    buf.freeze()
}

#[allow(clippy::cast_possible_truncation)]
fn put_write(buf: &mut BytesMut, write: &ConfigWrite) {
    match write {
        ConfigWrite::ConfigureWay { way, config } => {
            buf.put_u8(op::CONFIGURE_WAY);
            buf.put_u8(*way);
            put_way_config(buf, config);
        }
        ConfigWrite::InsertEntry { way, coord, entry, version } => {
            buf.put_u8(op::INSERT_ENTRY);
            buf.put_u8(*way);
            put_coord(buf, *coord);
            buf.put_u128_le(entry.mask());
            buf.put_u128_le(entry.data());
            buf.put_u8(entry.width() as u8);
            buf.put_u16_le(entry.vpn());
            buf.put_u32_le(entry.nibble_enable());
            buf.put_u8(entry.ctl().bits());
            buf.put_u8(version.value());
        }
        ConfigWrite::EvictEntry { way, coord } => {
            buf.put_u8(op::EVICT_ENTRY);
            buf.put_u8(*way);
            put_coord(buf, *coord);
        }
        ConfigWrite::InsertStash { row, slot, entry, version } => {
            buf.put_u8(op::INSERT_STASH);
            buf.put_u8(*row);
            buf.put_u8(*slot);
            buf.put_u128_le(entry.match_mask());
            buf.put_u128_le(entry.match_data());
            buf.put_u16_le(entry.vpn());
            buf.put_u8(u8::from(entry.bank_enable()));
            buf.put_u8(entry.result_bus_select());
            buf.put_u8(entry.input_data_ctl());
            buf.put_u8(version.value());
        }
        ConfigWrite::EvictStash { row, slot } => {
            buf.put_u8(op::EVICT_STASH);
            buf.put_u8(*row);
            buf.put_u8(*slot);
        }
        ConfigWrite::StashParity(groups) => {
            buf.put_u8(op::STASH_PARITY);
            put_parity_groups(buf, groups);
        }
        ConfigWrite::MissDefaults(d) => {
            buf.put_u8(op::MISS_DEFAULTS);
            buf.put_u8(d.next_table.0);
            for kind in AddressKind::ALL {
                let a = d.get(kind);
                buf.put_u32_le(a.miss_value);
                buf.put_u32_le(a.mask);
                buf.put_u32_le(a.default);
            }
        }
        ConfigWrite::SwapVersion(v) => {
            buf.put_u8(op::SWAP_VERSION);
            buf.put_u8(v.value());
        }
        ConfigWrite::RetireVersion(v) => {
            buf.put_u8(op::RETIRE_VERSION);
            buf.put_u8(v.value());
        }
    }
}

fn put_coord(buf: &mut BytesMut, coord: BankCoordinate) {
    buf.put_u8(coord.row);
    buf.put_u8(coord.bank);
    buf.put_u16_le(coord.vpn);
}

#[allow(clippy::cast_possible_truncation)]
fn put_way_config(buf: &mut BytesMut, config: &WayConfig) {
    let m = &config.matrix;
    buf.put_u8(m.input_width() as u8);
    buf.put_u8(m.rows().len() as u8);
    for &row in m.rows() {
        buf.put_u128_le(row);
    }
    buf.put_u64_le(m.seed());
    match config.layout {
        HashLayout::V1 { byte_swizzle } => {
            buf.put_u8(LAYOUT_V1);
            buf.put_slice(&byte_swizzle);
        }
        HashLayout::V2 { nibble_enable } => {
            buf.put_u8(LAYOUT_V2);
            buf.put_u32_le(nibble_enable);
        }
    }
    let a = &config.address_layout;
    for f in [a.row_select, a.bank_select, a.vpn] {
        buf.put_u8(f.lsb);
        buf.put_u8(f.width);
    }
    buf.put_u8(config.match_width as u8);
    put_parity_groups(buf, &config.parity_groups);
    buf.put_u8(config.next_table.0);
    for kind in AddressKind::ALL {
        buf.put_u8(config.shiftcounts.get(kind));
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_parity_groups(buf: &mut BytesMut, groups: &[ParityGroup]) {
    buf.put_u8(groups.len() as u8);
    for g in groups {
        let name = g.name().as_bytes();
        buf.put_u16_le(name.len() as u16);
        buf.put_slice(name);
        buf.put_u8(match g.field() {
            ParityField::Mask => 0,
            ParityField::Data => 1,
        });
        buf.put_u128_le(g.mask());
    }
}

// ── Decode ───────────────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(ExmError::journal(
                self.offset(),
                format!("truncated {what}: need {n} bytes, have {}", self.buf.remaining()),
            ));
        }
        Ok(())
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64_le())
    }

    fn u128(&mut self, what: &str) -> Result<u128> {
        self.need(16, what)?;
        Ok(self.buf.get_u128_le())
    }

    fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }
}

/// Decode a journal produced by [`encode`].
///
/// # Errors
///
/// Returns [`ExmError::Journal`] for a bad header, a truncated record, an
/// unknown opcode, or a record the engine constructors refuse.
pub fn decode(data: &[u8]) -> Result<Vec<ConfigWrite>> {
    let mut r = Reader::new(data);
    if r.bytes(MAGIC.len(), "magic")? != MAGIC {
        return Err(ExmError::journal(0, "bad magic"));
    }
    let format = r.u8("format version")?;
    if format != FORMAT_VERSION {
        return Err(ExmError::journal(
            MAGIC.len(),
            format!("format {format}, expected {FORMAT_VERSION}"),
        ));
    }

    let mut writes = Vec::new();
    while r.buf.has_remaining() {
        let start = r.offset();
        let opcode = r.u8("opcode")?;
        let write = decode_record(&mut r, opcode, start)?;
        writes.push(write);
    }
    debug!("journal: decoded {} writes from {} bytes", writes.len(), data.len());
    Ok(writes)
}

fn refused(start: usize) -> impl FnOnce(ExmError) -> ExmError {
    move |e| ExmError::journal(start, e.to_string())
}

fn decode_record(r: &mut Reader<'_>, opcode: u8, start: usize) -> Result<ConfigWrite> {
    let write = match opcode {
        op::CONFIGURE_WAY => {
            let way = r.u8("way")?;
            let config = get_way_config(r, start)?;
            ConfigWrite::ConfigureWay { way, config }
        }
        op::INSERT_ENTRY => {
            let way = r.u8("way")?;
            let coord = get_coord(r)?;
            let mask = r.u128("match_mask")?;
            let data = r.u128("match_data")?;
            let width = r.u8("width")?;
            let vpn = r.u16("vpn")?;
            let nibble_enable = r.u32("nibble enable")?;
            let ctl = r.u8("unit_ram_ctl")?;
            let version = VersionTag::new(r.u8("version")?);
            let entry = RamEntry::new(mask, data, u32::from(width), vpn)
                .map_err(refused(start))?
                .with_nibble_enable(nibble_enable)
                .with_ctl(UnitRamCtl::from_bits(ctl));
            ConfigWrite::InsertEntry { way, coord, entry, version }
        }
        op::EVICT_ENTRY => {
            let way = r.u8("way")?;
            let coord = get_coord(r)?;
            ConfigWrite::EvictEntry { way, coord }
        }
        op::INSERT_STASH => {
            let row = r.u8("row")?;
            let slot = r.u8("slot")?;
            let mask = r.u128("stash_match_mask")?;
            let data = r.u128("stash_match_data")?;
            let vpn = r.u16("vpn")?;
            let bank_enable = r.u8("bank_enable")? != 0;
            let bus = r.u8("result_bus_select")?;
            let ctl = r.u8("input_data_ctl")?;
            let version = VersionTag::new(r.u8("version")?);
            let entry = StashEntry::new(mask, data, vpn)
                .with_bank_enable(bank_enable)
                .with_routing(bus, ctl)
                .map_err(refused(start))?;
            ConfigWrite::InsertStash { row, slot, entry, version }
        }
        op::EVICT_STASH => {
            let row = r.u8("row")?;
            let slot = r.u8("slot")?;
            ConfigWrite::EvictStash { row, slot }
        }
        op::STASH_PARITY => ConfigWrite::StashParity(get_parity_groups(r, start)?),
        op::MISS_DEFAULTS => {
            let mut d = MissDefaults::new(NextTableId(r.u8("next table")?));
            for kind in AddressKind::ALL {
                let value = AddressDefault {
                    miss_value: r.u32("miss_value")?,
                    mask: r.u32("mask")?,
                    default: r.u32("default")?,
                };
                d = d.with(kind, value);
            }
            ConfigWrite::MissDefaults(d)
        }
        op::SWAP_VERSION => ConfigWrite::SwapVersion(VersionTag::new(r.u8("version")?)),
        op::RETIRE_VERSION => ConfigWrite::RetireVersion(VersionTag::new(r.u8("version")?)),
        other => {
            return Err(ExmError::journal(start, format!("unknown opcode 0x{other:02x}")));
        }
    };
    Ok(write)
}

fn get_coord(r: &mut Reader<'_>) -> Result<BankCoordinate> {
    Ok(BankCoordinate::new(r.u8("row")?, r.u8("bank")?, r.u16("vpn")?))
}

fn get_way_config(r: &mut Reader<'_>, start: usize) -> Result<WayConfig> {
    let input_width = r.u8("matrix input width")?;
    let row_count = r.u8("matrix rows")?;
    let mut rows = Vec::with_capacity(usize::from(row_count));
    for _ in 0..row_count {
        rows.push(r.u128("matrix row")?);
    }
    let seed = r.u64("hash seed")?;
    let matrix = GaloisMatrix::from_rows(u32::from(input_width), rows)
        .and_then(|m| m.with_seed(seed))
        .map_err(refused(start))?;

    let layout = match r.u8("hash layout")? {
        LAYOUT_V1 => {
            let mut byte_swizzle = [0u8; hash_input::V1_SWIZZLE_LANES];
            byte_swizzle.copy_from_slice(r.bytes(hash_input::V1_SWIZZLE_LANES, "byte_swizzle")?);
            HashLayout::V1 { byte_swizzle }
        }
        LAYOUT_V2 => HashLayout::V2 {
            nibble_enable: r.u32("nibble enable")?,
        },
        other => return Err(ExmError::journal(start, format!("unknown hash layout {other}"))),
    };

    let mut slice = |what: &str| -> Result<FieldSlice> { Ok(FieldSlice::new(r.u8(what)?, r.u8(what)?)) };
    let address_layout = UnitRamLayout {
        row_select: slice("row_select")?,
        bank_select: slice("bank_select")?,
        vpn: slice("vpn select")?,
    };

    let match_width = u32::from(r.u8("match width")?);
    let parity_groups = get_parity_groups(r, start)?;
    let next_table = NextTableId(r.u8("next table")?);
    let mut counts = [0u8; adr::KINDS];
    for c in &mut counts {
        *c = r.u8("exact_shiftcount")?;
    }
    let shiftcounts = ShiftCounts::new(counts).map_err(refused(start))?;

    let config = WayConfig {
        matrix,
        layout,
        address_layout,
        match_width,
        parity_groups,
        next_table,
        shiftcounts,
    };
    config.validate().map_err(refused(start))?;
    Ok(config)
}

fn get_parity_groups(r: &mut Reader<'_>, start: usize) -> Result<Vec<ParityGroup>> {
    let count = r.u8("parity group count")?;
    let mut groups = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let len = usize::from(r.u16("parity group name length")?);
        let name = std::str::from_utf8(r.bytes(len, "parity group name")?)
            .map_err(|e| ExmError::journal(start, format!("parity group name: {e}")))?;
        let field = match r.u8("parity field")? {
            0 => ParityField::Mask,
            1 => ParityField::Data,
            other => return Err(ExmError::journal(start, format!("unknown parity field {other}"))),
        };
        groups.push(ParityGroup::new(name, field, r.u128("parity mask")?));
    }
    Ok(groups)
}

// ── Files ────────────────────────────────────────────────────────────────────

/// Write `writes` as a journal file.
///
/// # Errors
///
/// Returns [`ExmError::Io`] if the file cannot be written.
pub fn write_file(path: impl AsRef<Path>, writes: &[ConfigWrite]) -> Result<()> {
    let path = path.as_ref();
    let data = encode(writes);
    std::fs::write(path, &data)?;
    info!("journal: wrote {} writes to {}", writes.len(), path.display());
    Ok(())
}

/// Read a journal file.
///
/// # Errors
///
/// Returns [`ExmError::Io`] if the file cannot be read and
/// [`ExmError::Journal`] if it does not decode.
pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<ConfigWrite>> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let writes = decode(&data)?;
    info!("journal: read {} writes from {}", writes.len(), path.display());
    Ok(writes)
}
