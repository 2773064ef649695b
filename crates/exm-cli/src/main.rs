//! `exm`: command-line harness for the exact-match lookup engine.
//!
//! ```text
//! USAGE:
//!   exm scenario                     Run the reference insert/lookup scenario
//!   exm hash <key> [--seed S]        Hash a 32-bit key and show its coordinate
//!   exm record <path>                Write the reference transaction as a journal
//!   exm replay <path> [--key K]...   Replay a journal and look keys up
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exm_chip::layout::{FieldSlice, UnitRamLayout};
use exm_chip::RamGeometry;
use exm_engine::prelude::*;
use exm_engine::{journal, AddressKind, HitSource, ShiftCounts};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exm", about = "Exact-match lookup engine harness", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Insert the reference entry and look up a hitting and a missing key.
    Scenario,
    /// Hash a key through the reference way and map it to a coordinate.
    Hash {
        /// Key value (hex with 0x prefix, or decimal).
        #[arg(value_parser = parse_u128)]
        key: u128,
        /// Hash seed XORed into the output.
        #[arg(long, default_value = "0", value_parser = parse_u128)]
        seed: u128,
    },
    /// Record the reference configuration transaction to a journal file.
    Record {
        /// Output path.
        path: PathBuf,
    },
    /// Replay a journal into a fresh engine on the reference geometry.
    Replay {
        /// Journal path.
        path: PathBuf,
        /// Keys to look up after replay (32-bit).
        #[arg(long = "key", value_parser = parse_u128)]
        keys: Vec<u128>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Scenario => cmd_scenario()?,
        Cmd::Hash { key, seed } => cmd_hash(key, seed)?,
        Cmd::Record { path } => cmd_record(&path)?,
        Cmd::Replay { path, keys } => cmd_replay(&path, &keys)?,
    }

    Ok(())
}

fn parse_u128(s: &str) -> std::result::Result<u128, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

/// Row `[1,4)`, bank `[4,8)`, VPN `[8,20)` of a 32-bit identity hash.
fn reference_layout() -> UnitRamLayout {
    UnitRamLayout {
        row_select: FieldSlice::new(1, 3),
        bank_select: FieldSlice::new(4, 4),
        vpn: FieldSlice::new(8, 12),
    }
}

fn reference_transaction(seed: u64) -> Result<Vec<ConfigWrite>> {
    let matrix = GaloisMatrix::identity(32)?.with_seed(seed)?;
    let way = WayConfig::new(matrix, reference_layout())
        .with_route(NextTableId(1), ShiftCounts::default());
    let entry = RamEntry::new(0xFFFF_FFFE, 0x1234_0000, 32, 0xA94)?;
    Ok(vec![
        ConfigWrite::ConfigureWay { way: 0, config: way },
        ConfigWrite::MissDefaults(MissDefaults::new(NextTableId(0))),
        ConfigWrite::InsertEntry {
            way: 0,
            coord: BankCoordinate::new(0, 0, 0),
            entry,
            version: VersionTag::ZERO,
        },
    ])
}

fn print_lookup(engine: &EngineState, bits: u128) -> Result<()> {
    let key = MatchKey::new(bits, 32).with_context(|| format!("key 0x{bits:x}"))?;
    let out = engine.lookup(&key)?;
    let r = &out.resolution;
    match r.hit() {
        Some(hit) => {
            let source = match hit.source {
                HitSource::Way(w) => format!("way {w}"),
                HitSource::Stash { slot, result_bus_select, .. } => {
                    format!("stash slot {slot} (bus {result_bus_select})")
                }
            };
            println!(
                "0x{bits:08x}  HIT   {source} {}  vpn 0x{:x}  → {}  instr_adr 0x{:x}",
                hit.coord,
                hit.vpn,
                r.next_table,
                r.addresses.get(AddressKind::Instr)
            );
        }
        None => println!(
            "0x{bits:08x}  MISS  → {}  instr_adr 0x{:x}",
            r.next_table,
            r.addresses.get(AddressKind::Instr)
        ),
    }
    for e in &out.parity_errors {
        println!("            parity: {e}");
    }
    Ok(())
}

fn cmd_scenario() -> Result<()> {
    let mut engine = EngineState::new(EngineConfig::from_geometry(&RamGeometry::REFERENCE))?;
    let n = engine.replay(reference_transaction(0)?)?;
    info!("scenario: {n} writes applied");

    println!("Entry: mask 0xfffffffe  data 0x12340000  vpn 0xa94  at r0b0 v0");
    println!();
    print_lookup(&engine, 0x1234_0001)?;
    print_lookup(&engine, 0x5678_0000)?;
    Ok(())
}

fn cmd_hash(key: u128, seed: u128) -> Result<()> {
    let seed = u64::try_from(seed).context("seed wider than 64 bits")?;
    let mut engine = EngineState::new(EngineConfig::default())?;
    let matrix = GaloisMatrix::identity(32)?.with_seed(seed)?;
    engine.configure_way(0, WayConfig::new(matrix, reference_layout()))?;

    let key = MatchKey::new(key, 32)?;
    let hash = engine.hash(0, &key)?;
    let words = hash.to_mux_words();
    println!("key              : 0x{:08x}", key.bits());
    println!("hash             : 0x{:x} ({} bits)", hash.value(), hash.width());
    println!("ram_address_mux  : {words:08x?}");
    match engine.locate(0, &key) {
        Ok(coord) => println!("coordinate       : {coord}"),
        Err(e) => println!("coordinate       : {e}"),
    }
    Ok(())
}

fn cmd_record(path: &Path) -> Result<()> {
    let writes = reference_transaction(0)?;
    journal::write_file(path, &writes)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Recorded {} writes to {}", writes.len(), path.display());
    Ok(())
}

fn cmd_replay(path: &Path, keys: &[u128]) -> Result<()> {
    let writes = journal::read_file(path).with_context(|| format!("reading {}", path.display()))?;
    for w in &writes {
        println!("  {}", w.kind());
    }
    let mut engine = EngineState::new(EngineConfig::default())?;
    let n = engine.replay(writes)?;
    let active = engine.active_version();
    println!(
        "Replayed {n} writes: active {active}, {} entries live, ways {:?}",
        engine.occupancy(active),
        engine.configured_ways().collect::<Vec<_>>()
    );

    let errors = engine.scrub();
    if errors.is_empty() {
        println!("Scrub: clean");
    } else {
        for e in &errors {
            println!("Scrub: {e}");
        }
    }

    if !keys.is_empty() {
        println!();
    }
    for &k in keys {
        print_lookup(&engine, k)?;
    }
    Ok(())
}
