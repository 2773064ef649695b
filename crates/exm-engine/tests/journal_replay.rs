//! Config-write journal tests
//!
//! A transaction recorded to disk and replayed into a fresh engine must
//! produce the same lookups as the engine it was recorded from.

use exm_engine::chip::{FieldSlice, UnitRamLayout};
use exm_engine::journal;
use exm_engine::prelude::*;
use exm_engine::{AddressDefault, AddressKind, ShiftCounts};
use tempfile::TempDir;

fn transaction() -> Vec<ConfigWrite> {
    let layout = UnitRamLayout {
        row_select: FieldSlice::new(1, 3),
        bank_select: FieldSlice::new(4, 3),
        vpn: FieldSlice::new(8, 12),
    };
    let matrix = GaloisMatrix::identity(32)
        .and_then(|m| m.with_seed(0x0000_0100))
        .expect("matrix");
    let way = WayConfig::new(matrix, layout)
        .with_layout(HashLayout::V1_IDENTITY)
        .with_parity_groups(vec![ParityGroup::from_half_words(
            "mask_w0",
            ParityField::Mask,
            &[(0xFFFF, 0xFFFF)],
        )])
        .with_route(NextTableId(3), ShiftCounts::new([0, 7, 0, 0, 0]).expect("shifts"));
    let miss = MissDefaults::new(NextTableId(9)).with(
        AddressKind::Stats,
        AddressDefault { miss_value: 0xABC, mask: 0xFFF, default: 0 },
    );
    let entry = RamEntry::new(0xFFFF_FFFF, 0x0000_1000, 32, 0x77).expect("entry");

    vec![
        ConfigWrite::ConfigureWay { way: 0, config: way },
        ConfigWrite::MissDefaults(miss),
        ConfigWrite::StashParity(vec![ParityGroup::new("stash_all", ParityField::Data, u128::MAX)]),
        ConfigWrite::InsertEntry {
            way: 0,
            coord: BankCoordinate::new(0, 0, 0),
            entry,
            version: VersionTag::new(1),
        },
        ConfigWrite::InsertStash {
            row: 0,
            slot: 1,
            entry: StashEntry::new(u128::from(u32::MAX), 0x0000_2000, 0x88)
                .with_routing(0, 0)
                .expect("routing"),
            version: VersionTag::new(1),
        },
        ConfigWrite::SwapVersion(VersionTag::new(1)),
        ConfigWrite::RetireVersion(VersionTag::ZERO),
    ]
}

fn outcome_of(engine: &EngineState, bits: u128) -> (Option<u16>, NextTableId, u32) {
    let out = engine
        .lookup(&MatchKey::new(bits, 32).expect("key"))
        .expect("lookup");
    (
        out.resolution.hit().map(|h| h.vpn),
        out.resolution.next_table,
        out.resolution.addresses.get(AddressKind::Stats),
    )
}

#[test]
fn test_file_round_trip_replays_identically() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("txn.exmj");

    let mut direct = EngineState::new(EngineConfig::default()).expect("engine");
    assert_eq!(direct.replay(transaction()).expect("direct"), 7);

    journal::write_file(&path, &transaction()).expect("write");
    let writes = journal::read_file(&path).expect("read");
    assert_eq!(writes.len(), 7);
    let mut replayed = EngineState::new(EngineConfig::default()).expect("engine");
    replayed.replay(writes).expect("replay");

    assert_eq!(replayed.active_version(), VersionTag::new(1));
    for bits in [0x0000_1000, 0x0000_2000, 0x0000_3000, 0xDEAD_0000] {
        assert_eq!(outcome_of(&direct, bits), outcome_of(&replayed, bits), "key 0x{bits:x}");
    }
    // seed 0x100 moves key 0x1000 to vpn bits only; entry and stash both reachable
    assert_eq!(outcome_of(&replayed, 0x0000_1000).0, Some(0x77));
    assert_eq!(outcome_of(&replayed, 0x0000_2000).0, Some(0x88));
    assert_eq!(outcome_of(&replayed, 0x0000_3000), (None, NextTableId(9), 0xABC));
    assert!(replayed.scrub().is_empty());
}

#[test]
fn test_truncated_file_is_journal_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("short.exmj");
    let full = journal::encode(&transaction());
    std::fs::write(&path, &full[..full.len() / 2]).expect("write");
    assert!(matches!(journal::read_file(&path), Err(ExmError::Journal { .. })));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = journal::read_file(dir.path().join("absent.exmj")).expect_err("missing");
    assert!(matches!(err, ExmError::Io { .. }));
}

#[test]
fn test_replay_stops_at_first_refused_write() {
    let mut engine = EngineState::new(EngineConfig::default()).expect("engine");
    let mut writes = transaction();
    // retiring the version just made active is refused
    writes.push(ConfigWrite::RetireVersion(VersionTag::new(1)));
    writes.push(ConfigWrite::SwapVersion(VersionTag::ZERO));
    assert!(engine.replay(writes).is_err());
    assert_eq!(engine.active_version(), VersionTag::new(1));
}
