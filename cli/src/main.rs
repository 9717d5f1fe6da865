//! flowindex CLI: replay chain fixtures through the sync loop.
//!
//! Usage:
//! ```bash
//! flowindex replay fixtures/emulator.json
//! flowindex replay fixtures/emulator.json --sqlite ./flowindex.db --json-logs
//! flowindex replay fixtures/emulator.json --config indexer.json --follow
//! flowindex info
//! ```

mod logging;

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowindex_core::{ChainFixture, Entity, IndexerConfig, Indexes, MemoryGateway, ResourceIndex};
use flowindex_storage::sqlite::SqliteStorage;
use flowindex_storage::InMemoryStorage;
use flowindex_sync::{PersistReport, SyncLoop, SyncLoopBuilder};

use crate::logging::{init_tracing, LogConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "replay" => {
            let opts = ReplayOptions::parse(&args[2..])?;
            cmd_replay(opts).await?;
        }
        "info" => cmd_info(),
        "version" | "--version" | "-V" => {
            println!("flowindex {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
    Ok(())
}

fn print_usage() {
    println!("flowindex {}", env!("CARGO_PKG_VERSION"));
    println!("Flow blockchain sync and indexing engine\n");
    println!("USAGE:");
    println!("    flowindex <COMMAND> [OPTIONS]\n");
    println!("COMMANDS:");
    println!("    replay <fixture.json>  Index a chain fixture and print entity counts");
    println!("    info                   Show default configuration");
    println!("    version                Print version");
    println!("    help                   Print this help\n");
    println!("REPLAY OPTIONS:");
    println!("    --config <file>        Indexer configuration (JSON)");
    println!("    --sqlite <path>        Persist to SQLite instead of memory");
    println!("    --log-level <level>    trace | debug | info | warn | error");
    println!("    --log <crate>=<level>  Per-crate log level override");
    println!("    --json-logs            Emit JSON structured logs");
    println!("    --follow               Keep polling until Ctrl-C");
}

fn cmd_info() {
    let config = IndexerConfig::default();
    println!("FlowIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default chain: {}", config.chain);
    println!("  Default poll interval: {} ms", config.poll_interval_ms);
    println!("  Token withdrawn pattern: {}", config.token_withdrawn_pattern);
    println!("  Token deposited pattern: {}", config.token_deposited_pattern);
    println!("  Storage backends: memory, SQLite");
}

#[derive(Debug, Default)]
struct ReplayOptions {
    fixture: PathBuf,
    config: Option<PathBuf>,
    sqlite: Option<String>,
    log: LogConfig,
    follow: bool,
}

impl ReplayOptions {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut opts = Self::default();
        let mut fixture = None;
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => opts.config = Some(next_value(&mut iter, arg)?.into()),
                "--sqlite" => opts.sqlite = Some(next_value(&mut iter, arg)?),
                "--log-level" => opts.log.level = next_value(&mut iter, arg)?,
                "--log" => {
                    let value = next_value(&mut iter, arg)?;
                    let (component, level) = value
                        .split_once('=')
                        .with_context(|| format!("--log expects <crate>=<level>, got {value}"))?;
                    opts.log.components.insert(component.into(), level.into());
                }
                "--json-logs" => opts.log.json = true,
                "--follow" => opts.follow = true,
                flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
                path => fixture = Some(PathBuf::from(path)),
            }
        }

        opts.fixture = fixture.context("replay needs a fixture file")?;
        Ok(opts)
    }
}

fn next_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> anyhow::Result<String> {
    iter.next()
        .cloned()
        .with_context(|| format!("{flag} needs a value"))
}

/// Entity counts printed after a replay.
#[derive(Debug, Serialize)]
struct ReplaySummary {
    last_indexed_height: Option<u64>,
    blocks: usize,
    transactions: usize,
    events: usize,
    accounts: usize,
    account_keys: usize,
    contracts: usize,
    storage_items: usize,
    dispatched: usize,
    failed_dispatches: usize,
}

impl ReplaySummary {
    async fn collect(indexes: &Indexes, items: &PersistReport) -> anyhow::Result<Self> {
        Ok(Self {
            last_indexed_height: indexes.last_indexed_height().await?,
            blocks: count(indexes.blocks.as_ref()).await?,
            transactions: count(indexes.transactions.as_ref()).await?,
            events: count(indexes.events.as_ref()).await?,
            accounts: count(indexes.accounts.as_ref()).await?,
            account_keys: count(indexes.account_keys.as_ref()).await?,
            contracts: count(indexes.contracts.as_ref()).await?,
            storage_items: count(indexes.storage.as_ref()).await?,
            dispatched: items.dispatched,
            failed_dispatches: items.failed,
        })
    }
}

async fn count<E: Entity>(index: &dyn ResourceIndex<E>) -> anyhow::Result<usize> {
    Ok(index.find_all().await?.len())
}

async fn cmd_replay(opts: ReplayOptions) -> anyhow::Result<()> {
    init_tracing(&opts.log);

    let raw = std::fs::read_to_string(&opts.fixture)
        .with_context(|| format!("reading {}", opts.fixture.display()))?;
    let fixture: ChainFixture = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", opts.fixture.display()))?;

    let config = match &opts.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<IndexerConfig>(&raw)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => IndexerConfig::default(),
    };

    let indexes = match &opts.sqlite {
        Some(path) => SqliteStorage::open(path).await?.indexes(),
        None => InMemoryStorage::new().indexes(),
    };

    let gateway = Arc::new(MemoryGateway::from_fixture(fixture));
    let target = gateway.head_height();
    let sync = SyncLoopBuilder::new()
        .config(config)
        .gateway_with_storage(gateway)
        .indexes(indexes)
        .build()?;

    info!(
        fixture = %opts.fixture.display(),
        chain = %sync.config().chain,
        head = ?target,
        "Replaying fixture"
    );

    let items = if opts.follow {
        follow(&sync).await;
        PersistReport::default()
    } else {
        let items = catch_up(&sync, target).await;
        drain_watchers(&sync).await;
        sync.shutdown().await;
        items
    };

    let summary = ReplaySummary::collect(sync.indexes(), &items).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if target.is_some() && summary.last_indexed_height != target {
        bail!(
            "stopped at height {:?} before reaching head {:?}",
            summary.last_indexed_height,
            target
        );
    }
    Ok(())
}

/// Tick until the index reaches `target` or a tick makes no progress.
async fn catch_up(sync: &SyncLoop, target: Option<u64>) -> PersistReport {
    let mut totals = PersistReport::default();
    loop {
        let report = sync.process_blockchain_data().await;
        totals.transactions += report.items.transactions;
        totals.events += report.items.events;
        totals.dispatched += report.items.dispatched;
        totals.failed += report.items.failed;

        if let Some(reason) = report.skipped {
            warn!(?reason, "Tick skipped, stopping replay");
            break;
        }
        if let Some(height) = report.failed_height {
            warn!(height, "Height failed, stopping replay");
            break;
        }
        if report.processed.is_empty() || report.processed.last().copied() >= target {
            break;
        }
    }
    totals
}

async fn drain_watchers(sync: &SyncLoop) {
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while sync.watchers().active() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(active = sync.watchers().active(), "Status watchers still running, cancelling");
    }
}

/// Run the sync loop until Ctrl-C.
async fn follow(sync: &SyncLoop) {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    sync.run(cancel).await;
}
