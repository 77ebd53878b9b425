//! dexstore CLI
//!
//! Command-line interface over an engine data directory.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dexstore::{Config, Engine, IndexKind, Record};
use tracing_subscriber::{fmt, EnvFilter};

/// dexstore CLI
#[derive(Parser, Debug)]
#[command(name = "dexstore")]
#[command(about = "Embedded record log with B-tree, B+tree and hash indexes")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./dexstore_data")]
    data_dir: String,

    /// Index built on first open: btree, bplus or hash
    #[arg(short, long, default_value = "bplus")]
    index: IndexKind,

    /// Tree order (max children per node)
    #[arg(short, long, default_value = "8")]
    order: u64,

    /// Hash bucket load factor
    #[arg(short = 'l', long, default_value = "8")]
    load_factor: u64,

    /// fsync the record log after every write
    #[arg(long)]
    sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a new record
    Insert {
        id: u32,
        body: String,
    },

    /// Print a record by id
    Get {
        id: u32,
    },

    /// Replace the body of an existing record
    Update {
        id: u32,
        body: String,
    },

    /// Delete a record by id
    Delete {
        id: u32,
    },

    /// Print every live record in log order
    Scan,

    /// Print records with lo <= id <= hi (tree indexes only)
    Range {
        lo: u32,
        hi: u32,
    },

    /// Rebuild the index from the record log, optionally as another kind
    Rebuild {
        kind: Option<IndexKind>,
    },

    /// Check index structure against the record log
    Verify,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dexstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .index_kind(args.index)
        .tree_order(args.order)
        .hash_load_factor(args.load_factor)
        .sync_on_write(args.sync)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&engine, args.command);
    let closed = engine.close();

    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Commands) -> dexstore::Result<()> {
    match command {
        Commands::Insert { id, body } => {
            let address = engine.create(&Record::new(id, body))?;
            println!("OK {}", address);
        }
        Commands::Get { id } => print_record(&engine.read(id)?),
        Commands::Update { id, body } => {
            let address = engine.update(&Record::new(id, body))?;
            println!("OK {}", address);
        }
        Commands::Delete { id } => {
            engine.delete(id)?;
            println!("OK");
        }
        Commands::Scan => {
            for record in engine.scan_live()? {
                print_record(&record);
            }
        }
        Commands::Range { lo, hi } => {
            for record in engine.range(lo, hi)? {
                print_record(&record);
            }
        }
        Commands::Rebuild { kind } => {
            let kind = kind.unwrap_or_else(|| engine.index_kind());
            let stats = engine.rebuild_index(kind)?;
            println!(
                "rebuilt {} index: {} indexed, {} tombstoned, {} scanned",
                kind, stats.indexed, stats.skipped, stats.scanned
            );
        }
        Commands::Verify => {
            let report = engine.verify()?;
            println!(
                "{} index OK: {} entries, depth {}, {} units ({} free), {} of {} slots live",
                report.index.kind,
                report.index.entries,
                report.index.depth,
                report.index.units,
                report.index.free_units,
                report.live_records,
                report.slots
            );
        }
    }
    Ok(())
}

fn print_record(record: &Record) {
    println!("{}\t{}", record.id, String::from_utf8_lossy(&record.body));
}
