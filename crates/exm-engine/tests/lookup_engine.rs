//! End-to-end lookup tests
//!
//! Full pipeline: hash → map → ways → stash → resolve, on the reference
//! geometry.

use exm_engine::chip::{FieldSlice, UnitRamLayout};
use exm_engine::prelude::*;
use exm_engine::{AddressDefault, AddressKind, HitSource, ShiftCounts};
use proptest::prelude::*;
use std::sync::Arc;

/// Row `[1,4)`, bank `[4,8)`, VPN `[8,20)`: keys differing only in bit 0 or
/// above bit 8 land in the same slot.
fn scenario_layout() -> UnitRamLayout {
    UnitRamLayout {
        row_select: FieldSlice::new(1, 3),
        bank_select: FieldSlice::new(4, 4),
        vpn: FieldSlice::new(8, 12),
    }
}

fn key(bits: u128) -> MatchKey {
    MatchKey::new(bits, 32).expect("32-bit key")
}

fn identity_way(next_table: u8) -> WayConfig {
    WayConfig::new(GaloisMatrix::identity(32).expect("identity matrix"), scenario_layout())
        .with_route(NextTableId(next_table), ShiftCounts::default())
}

fn engine_with_ways(n: usize) -> EngineState {
    let miss = MissDefaults::new(NextTableId(0xFF)).with(
        AddressKind::Instr,
        AddressDefault { miss_value: 0x3F, mask: 0xFFFF_FFFF, default: 0 },
    );
    let mut engine =
        EngineState::new(EngineConfig::default().with_miss_defaults(miss)).expect("engine");
    for (way, next_table) in (0..n).zip(10u8..) {
        engine
            .configure_way(way, identity_way(next_table))
            .expect("configure way");
    }
    engine
}

fn scenario_entry(vpn: u16) -> RamEntry {
    RamEntry::new(0xFFFF_FFFE, 0x1234_0000, 32, vpn).expect("entry")
}

const ORIGIN: BankCoordinate = BankCoordinate::new(0, 0, 0);

#[test]
fn test_reference_scenario() {
    let mut engine = engine_with_ways(1);
    engine
        .insert(0, ORIGIN, scenario_entry(0xA94), VersionTag::ZERO)
        .expect("insert");

    let hit_key = key(0x1234_0001);
    assert_eq!(engine.locate(0, &hit_key).expect("locate").row, 0);
    let out = engine.lookup(&hit_key).expect("lookup");
    assert!(out.is_clean());
    let hit = out.resolution.hit().expect("hit");
    assert_eq!(hit.vpn, 0xA94);
    assert_eq!(hit.source, HitSource::Way(0));
    assert_eq!(out.resolution.next_table, NextTableId(10));

    let miss_key = key(0x5678_0000);
    let loc = engine.locate(0, &miss_key).expect("locate");
    assert_eq!((loc.row, loc.bank), (0, 0), "both keys share the slot");
    let out = engine.lookup(&miss_key).expect("lookup");
    assert!(out.resolution.is_miss());
    assert_eq!(out.resolution.next_table, NextTableId(0xFF));
    assert_eq!(out.resolution.addresses.get(AddressKind::Instr), 0x3F);
}

#[test]
fn test_repeated_insert_is_idempotent() {
    let mut engine = engine_with_ways(1);
    for _ in 0..3 {
        engine
            .insert(0, ORIGIN, scenario_entry(0xA94), VersionTag::ZERO)
            .expect("insert");
    }
    assert_eq!(engine.occupancy(VersionTag::ZERO), 1);
    let out = engine.lookup(&key(0x1234_0001)).expect("lookup");
    assert_eq!(out.resolution.hit().map(|h| h.vpn), Some(0xA94));
}

#[test]
fn test_way_zero_wins_over_way_one() {
    let mut engine = engine_with_ways(2);
    engine.insert(0, ORIGIN, scenario_entry(0x111), VersionTag::ZERO).expect("way 0");
    engine.insert(1, ORIGIN, scenario_entry(0x222), VersionTag::ZERO).expect("way 1");

    let out = engine.lookup(&key(0x1234_0000)).expect("lookup");
    let hit = out.resolution.hit().expect("hit");
    assert_eq!(hit.source, HitSource::Way(0));
    assert_eq!(hit.vpn, 0x111);
    assert_eq!(out.resolution.hit_map, 0b11);

    engine.evict(0, ORIGIN).expect("evict");
    let out = engine.lookup(&key(0x1234_0000)).expect("lookup");
    assert_eq!(out.resolution.hit().map(|h| h.vpn), Some(0x222));
    assert_eq!(out.resolution.next_table, NextTableId(11));
    assert_eq!(out.resolution.hit_map, 0b10);
}

#[test]
fn test_stash_catches_collision() {
    let mut engine = engine_with_ways(1);
    engine.insert(0, ORIGIN, scenario_entry(0xA94), VersionTag::ZERO).expect("insert");

    // 0x1234_0100 lands in row 0, bank 0 too but disagrees with the way entry
    let collided = key(0x1234_0100);
    assert_eq!(engine.locate(0, &collided).expect("locate").bank, 0);
    assert!(engine.lookup(&collided).expect("lookup").resolution.is_miss());

    let stash = StashEntry::new(u128::from(u32::MAX), 0x1234_0100, 0x321);
    engine.insert_stash(0, 3, stash, VersionTag::ZERO).expect("stash");
    let out = engine.lookup(&collided).expect("lookup");
    let hit = out.resolution.hit().expect("stash hit");
    assert!(matches!(hit.source, HitSource::Stash { slot: 3, result_bus_select: 0, .. }));
    assert_eq!(hit.vpn, 0x321);
    assert_eq!(out.resolution.hit_map, 0, "no way hit");
    assert_eq!(out.resolution.next_table, NextTableId(10));

    // the way entry still wins for its own key
    let out = engine.lookup(&key(0x1234_0001)).expect("lookup");
    assert_eq!(out.resolution.hit().map(|h| h.source), Some(HitSource::Way(0)));
}

#[test]
fn test_empty_stash_row_misses() {
    let mut engine = engine_with_ways(1);
    engine
        .insert_stash(0, 0, StashEntry::new(0, 0, 1), VersionTag::ZERO)
        .expect("stash");
    // row 1 has no stash entries
    let out = engine.lookup(&key(0x0000_0002)).expect("lookup");
    assert!(out.resolution.is_miss());
    // row 0's catch-all slot answers
    let out = engine.lookup(&key(0x0000_0000)).expect("lookup");
    assert!(out.resolution.hit().is_some());
}

#[test]
fn test_make_before_break_reload() {
    let mut engine = engine_with_ways(1);
    let old = RamEntry::new(u128::from(u32::MAX), 0x1234_0000, 32, 0x100).expect("old");
    let new = RamEntry::new(u128::from(u32::MAX), 0x1234_0000, 32, 0x200).expect("new");
    let k = key(0x1234_0000);

    engine.insert(0, ORIGIN, old, VersionTag::ZERO).expect("insert old");
    let staged = engine.staged_version();
    assert_eq!(staged, VersionTag::new(1));
    engine.insert(0, ORIGIN, new, staged).expect("insert new");

    // staged copy invisible until the swap
    assert_eq!(engine.lookup(&k).expect("lookup").resolution.hit().map(|h| h.vpn), Some(0x100));
    assert_eq!(engine.swap_active_version(staged).expect("swap"), VersionTag::ZERO);
    let out = engine.lookup(&k).expect("lookup");
    assert_eq!(out.resolution.hit().map(|h| (h.vpn, h.version)), Some((0x200, staged)));

    assert!(engine.retire_version(staged).is_err(), "active version is protected");
    assert_eq!(engine.retire_version(VersionTag::ZERO).expect("retire"), 1);
    engine.swap_active_version(VersionTag::ZERO).expect("swap back");
    assert!(engine.lookup(&k).expect("lookup").resolution.is_miss());
}

#[test]
fn test_lookups_never_mix_versions() {
    let mut engine = engine_with_ways(2);
    for (version, vpn) in [(VersionTag::ZERO, 0x100), (VersionTag::new(1), 0x200)] {
        let e = RamEntry::new(u128::from(u32::MAX), 0x1234_0000, 32, vpn).expect("entry");
        engine.insert(0, ORIGIN, e, version).expect("way 0");
        engine.insert(1, ORIGIN, e, version).expect("way 1");
    }
    let engine = Arc::new(engine);
    let k = key(0x1234_0000);

    std::thread::scope(|s| {
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            s.spawn(move || {
                for _ in 0..2_000 {
                    let out = engine.lookup(&k).expect("lookup");
                    let hit = out.resolution.hit().expect("always a hit");
                    let expected = if hit.version == VersionTag::ZERO { 0x100 } else { 0x200 };
                    assert_eq!(hit.vpn, expected, "vpn from a different version");
                    assert_eq!(out.resolution.hit_map, 0b11);
                }
            });
        }
        for i in 0..500u32 {
            #[allow(clippy::cast_possible_truncation)]
            let v = VersionTag::new((i % 2) as u8 ^ 1);
            engine.swap_active_version(v).expect("swap");
        }
    });
    assert_eq!(engine.swap_count(), 500);
}

#[test]
fn test_parity_fault_flagged_not_fatal() {
    let groups = vec![ParityGroup::from_half_words("data_lo", ParityField::Data, &[(0x00FF, 0x0000)])];
    let mut engine = EngineState::new(EngineConfig::default()).expect("engine");
    engine
        .configure_way(0, identity_way(10).with_parity_groups(groups))
        .expect("configure");
    engine.insert(0, ORIGIN, scenario_entry(0xA94), VersionTag::ZERO).expect("insert");
    assert!(engine.scrub().is_empty());

    // bit 0 is don't-care in the compare but covered by the group
    engine
        .inject_fault(0, ORIGIN, VersionTag::ZERO, ParityField::Data, 0)
        .expect("inject");
    let out = engine.lookup(&key(0x1234_0001)).expect("lookup");
    assert_eq!(out.resolution.hit().map(|h| h.vpn), Some(0xA94), "best-effort result");
    assert_eq!(out.parity_errors.len(), 1);
    assert_eq!(out.parity_errors[0].group, "data_lo");
    assert!(matches!(out.into_result(), Err(ExmError::Parity(_))));

    let scrubbed = engine.scrub();
    assert_eq!(scrubbed.len(), 1);
    assert!(scrubbed[0].location.contains("way 0"));
}

#[test]
fn test_fault_outside_group_is_silent() {
    let groups = vec![ParityGroup::from_half_words("data_lo", ParityField::Data, &[(0x00FF, 0x0000)])];
    let mut engine = EngineState::new(EngineConfig::default()).expect("engine");
    engine
        .configure_way(0, identity_way(10).with_parity_groups(groups))
        .expect("configure");
    engine.insert(0, ORIGIN, scenario_entry(0xA94), VersionTag::ZERO).expect("insert");
    engine
        .inject_fault(0, ORIGIN, VersionTag::ZERO, ParityField::Data, 20)
        .expect("inject");
    assert!(engine.scrub().is_empty());
}

#[test]
fn test_stash_parity_fault_reported_on_probe() {
    let groups = vec![ParityGroup::new("stash_w0", ParityField::Data, u128::from(u32::MAX))];
    let config = EngineConfig::default().with_stash_parity_groups(groups);
    let mut engine = EngineState::new(config).expect("engine");
    engine.configure_way(0, identity_way(10)).expect("configure");
    engine
        .insert_stash(0, 0, StashEntry::new(0, 0x5, 7), VersionTag::ZERO)
        .expect("stash");
    engine
        .inject_stash_fault(0, 0, VersionTag::ZERO, ParityField::Data, 1)
        .expect("inject");
    let out = engine.lookup(&key(0)).expect("lookup");
    assert_eq!(out.resolution.hit().map(|h| h.vpn), Some(7));
    assert_eq!(out.parity_errors.len(), 1);
}

#[test]
fn test_refused_configuration_leaves_engine_unchanged() {
    let mut engine = engine_with_ways(1);
    engine
        .insert(0, ORIGIN, scenario_entry(0xA94), VersionTag::ZERO)
        .expect("insert");

    let wide_vpn = UnitRamLayout {
        vpn: FieldSlice::new(6, 17),
        ..scenario_layout()
    };
    let refused = WayConfig::new(GaloisMatrix::identity(32).expect("identity matrix"), wide_vpn);
    engine
        .configure_way(1, refused.clone())
        .expect_err("vpn wider than 16 bits");
    engine
        .configure_way(0, refused)
        .expect_err("vpn wider than 16 bits");
    assert_eq!(engine.configured_ways().collect::<Vec<_>>(), vec![0]);

    let out = engine.lookup(&key(0x1234_0001)).expect("lookup");
    assert_eq!(out.resolution.hit().expect("hit").vpn, 0xA94);
    assert_eq!(out.resolution.next_table, NextTableId(10));
    let out = engine.lookup(&key(0x5678_0000)).expect("lookup");
    assert!(out.resolution.is_miss());
    assert_eq!(out.resolution.next_table, NextTableId(0xFF));
}

#[test]
fn test_hash_landing_outside_array_is_range_error() {
    let engine = engine_with_ways(1);
    // bank field = 0xF, array has 12 banks
    let err = engine.lookup(&key(0x0000_00F0)).expect_err("range");
    assert!(matches!(err, ExmError::Range { what: "bank", .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_shiftcount_selects_address_bits() {
    let miss = MissDefaults::new(NextTableId(0)).with(
        AddressKind::ActionData,
        AddressDefault { miss_value: 0, mask: 0x7F, default: 0x8000 },
    );
    let mut engine =
        EngineState::new(EngineConfig::default().with_miss_defaults(miss)).expect("engine");
    let shifts = ShiftCounts::new([0, 7, 0, 0, 0]).expect("shifts");
    let cfg = identity_way(1).with_route(NextTableId(1), shifts);
    engine.configure_way(0, cfg).expect("configure");
    let entry = RamEntry::new(u128::from(u32::MAX), 0x0000_0054, 32, 0x55).expect("entry");
    let coord = engine.insert_key(0, &key(0x54), entry, VersionTag::ZERO).expect("insert");
    assert_eq!((coord.row, coord.bank), (2, 5));
    let out = engine.lookup(&key(0x54)).expect("lookup");
    // match address = (0x55 << 7) | (2 << 4) | 5; >> 7 & 0x7F = 0x55
    assert_eq!(out.resolution.addresses.get(AddressKind::ActionData), 0x8055);
}

fn fitting_layout() -> UnitRamLayout {
    UnitRamLayout {
        row_select: FieldSlice::new(0, 3),
        bank_select: FieldSlice::new(3, 3),
        vpn: FieldSlice::new(6, 12),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn masked_round_trip(data in any::<u32>(), mask in any::<u32>(), k in any::<u32>()) {
        let mut engine = EngineState::new(EngineConfig::default()).expect("engine");
        let cfg = WayConfig::new(GaloisMatrix::identity(32).expect("matrix"), fitting_layout());
        engine.configure_way(0, cfg).expect("configure");

        let key = MatchKey::new(u128::from(k), 32).expect("key");
        let entry = RamEntry::new(u128::from(mask), u128::from(data), 32, 0x42).expect("entry");
        engine.insert_key(0, &key, entry, VersionTag::ZERO).expect("insert");

        let out = engine.lookup(&key).expect("lookup");
        let should_hit = (k & mask) == (data & mask);
        prop_assert_eq!(out.resolution.hit().is_some(), should_hit);
    }

    #[test]
    fn locate_is_deterministic(k in any::<u32>(), seed in any::<u16>()) {
        let mut engine = EngineState::new(EngineConfig::default()).expect("engine");
        let matrix = GaloisMatrix::identity(32)
            .and_then(|m| m.with_seed(u64::from(seed) << 20))
            .expect("matrix");
        engine.configure_way(0, WayConfig::new(matrix, fitting_layout())).expect("configure");
        let key = MatchKey::new(u128::from(k), 32).expect("key");
        prop_assert_eq!(engine.locate(0, &key).expect("a"), engine.locate(0, &key).expect("b"));
    }
}
