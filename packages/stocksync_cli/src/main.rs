//! stocksync - edit a local stock replica and sync it with the ledger
//!
//! Run with: cargo run -p stocksync-cli -- <command>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use stocksync::ledger::HttpLedgerClient;
use stocksync::record::SystemClock;
use stocksync::scan::ScanIntake;
use stocksync::store::views::SortMode;
use stocksync::store::JsonFileRecordStore;
use stocksync::sync::{PullReport, PushReport};
use stocksync::{
    Inventory, Location, ProductId, Quantities, RecordDraft, Scope, StockRecord, SyncConfig,
    SyncContext, SyncEngine,
};

#[derive(Parser)]
#[command(name = "stocksync", about = "Offline-first stock counts synced through a shared ledger")]
struct Cli {
    /// Config file (JSON). Missing file means defaults.
    #[arg(long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Print records as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show one record by product code
    Lookup { id: String },

    /// Create or overwrite a record
    Save {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        maker: String,
        #[arg(long, default_value_t = 0)]
        shelf: u32,
        #[arg(long, default_value_t = 0)]
        back_order: u32,
        #[arg(long, default_value_t = 0)]
        offsite: u32,
        /// Push right after saving
        #[arg(long)]
        push: bool,
    },

    /// Add a (possibly negative) amount to one location
    Adjust {
        id: String,
        location: Location,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
        #[arg(long)]
        push: bool,
    },

    /// Mark a record deleted
    Delete {
        id: String,
        #[arg(long)]
        push: bool,
    },

    /// List live records
    List {
        #[arg(long, default_value = "")]
        search: String,
        /// date-desc, date-asc, stock-desc, stock-asc, maker-asc, maker-desc
        #[arg(long, default_value = "date-desc")]
        sort: SortMode,
    },

    /// Per-location totals
    Totals,

    /// Records with changes the ledger has not acknowledged
    Pending,

    /// Push local changes to the ledger
    Push {
        /// Push only this record
        #[arg(long)]
        id: Option<String>,
        /// Push every record, not just pending ones
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Pull the ledger into the local store
    Pull {
        /// all, shelf, backOrder or offsite
        #[arg(long)]
        scope: Option<Scope>,
    },

    /// Push pending changes, then pull
    Sync {
        #[arg(long)]
        scope: Option<Scope>,
    },

    /// Read scanned codes from stdin, one per line
    Scan {
        /// Add one to this location for every scan of a known product
        #[arg(long)]
        count: Option<Location>,
    },
}

fn default_config_path() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
        .join(".stocksync/config.json")
}

/// Stable per-replica id, kept beside the records.
async fn device_id(data_dir: &Path) -> Result<Uuid> {
    let path = data_dir.join(".device_id");
    if let Ok(existing) = tokio::fs::read_to_string(&path).await {
        if let Ok(id) = existing.trim().parse() {
            return Ok(id);
        }
        log::warn!("Ignoring unreadable device id at {}", path.display());
    }
    let id = Uuid::new_v4();
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("creating {}", data_dir.display()))?;
    tokio::fs::write(&path, id.to_string())
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(id)
}

struct App {
    config: SyncConfig,
    store: Arc<JsonFileRecordStore>,
    clock: Arc<SystemClock>,
    inventory: Arc<Inventory>,
    json: bool,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = SyncConfig::load(&cli.config)?;
        let store = Arc::new(
            JsonFileRecordStore::open(&config.data_dir)
                .await
                .with_context(|| format!("opening store at {}", config.data_dir.display()))?,
        );
        let clock = Arc::new(SystemClock::new());
        let inventory = Arc::new(Inventory::new(store.clone(), clock.clone()));
        Ok(Self {
            config,
            store,
            clock,
            inventory,
            json: cli.json,
        })
    }

    fn engine(&self) -> Result<SyncEngine> {
        let Some(url) = &self.config.ledger_url else {
            bail!(
                "no ledger configured; set ledger_url in the config or {}",
                stocksync::config::ENV_LEDGER_URL
            );
        };
        let client = HttpLedgerClient::new(url.clone(), self.config.request_timeout())?;
        Ok(
            SyncEngine::new(self.store.clone(), Arc::new(client), self.clock.clone())
                .with_config(&self.config),
        )
    }

    async fn context(&self, scope: Option<Scope>) -> Result<SyncContext> {
        let device = device_id(&self.config.data_dir).await?;
        Ok(SyncContext::new(device).with_scope(scope.unwrap_or(self.config.default_scope)))
    }

    async fn push_one(&self, id: &ProductId) -> Result<()> {
        let ctx = self.context(None).await?.with_active(id.clone());
        let report = self.engine()?.push_active(&ctx).await?;
        print_push(&report);
        Ok(())
    }

    fn show(&self, records: &[StockRecord]) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(records)?);
            return Ok(());
        }
        if records.is_empty() {
            println!("(no records)");
            return Ok(());
        }
        println!(
            "{:<13}  {:>6} {:>6} {:>6}  {:<1} {:<24} {}",
            "ID", "SHELF", "BACK", "OFF", "", "NAME", "MAKER"
        );
        for r in records {
            let q = &r.quantities;
            let flag = if r.deleted {
                "x"
            } else if r.is_pending() {
                "*"
            } else {
                ""
            };
            println!(
                "{:<13}  {:>6} {:>6} {:>6}  {:<1} {:<24} {}",
                r.id, q.shelf, q.back_order, q.offsite, flag, r.name, r.maker_code
            );
        }
        Ok(())
    }
}

fn print_push(report: &PushReport) {
    println!(
        "Pushed in {} round(s): {} accepted, {} merged, {} tombstone(s) collected",
        report.attempts, report.accepted, report.merged, report.collected
    );
}

fn print_pull(report: &PullReport) {
    println!(
        "Pulled: {} applied, {} removed, {} skipped with local changes",
        report.applied, report.removed, report.skipped
    );
}

async fn run(cli: Cli) -> Result<()> {
    let app = App::open(&cli).await?;

    match cli.command {
        Command::Lookup { id } => match app.inventory.lookup(&id).await? {
            Some(record) => app.show(&[record])?,
            None => println!("No record for {}", id.trim()),
        },

        Command::Save {
            id,
            name,
            maker,
            shelf,
            back_order,
            offsite,
            push,
        } => {
            let draft = RecordDraft {
                id,
                name,
                maker_code: maker,
                quantities: Quantities::new(shelf, back_order, offsite),
            };
            let record = app.inventory.save(&draft).await?;
            app.show(std::slice::from_ref(&record))?;
            if push {
                app.push_one(&record.id).await?;
            }
        }

        Command::Adjust {
            id,
            location,
            delta,
            push,
        } => {
            let id = ProductId::parse(&id)?;
            let record = app.inventory.adjust(&id, location, delta).await?;
            app.show(std::slice::from_ref(&record))?;
            if push {
                app.push_one(&record.id).await?;
            }
        }

        Command::Delete { id, push } => {
            let id = ProductId::parse(&id)?;
            app.inventory.delete(&id).await?;
            println!("Marked {} deleted", id);
            if push {
                app.push_one(&id).await?;
            }
        }

        Command::List { search, sort } => {
            let records = app.inventory.list(&search, sort).await?;
            app.show(&records)?;
        }

        Command::Totals => {
            let totals = app.inventory.totals().await?;
            if app.json {
                println!("{}", serde_json::to_string_pretty(&totals)?);
            } else {
                for location in Location::ALL {
                    println!("{:<10} {}", location.tag(), totals.get(location));
                }
                println!("{:<10} {}", "total", totals.total());
            }
        }

        Command::Pending => {
            let records = app.inventory.pending().await?;
            app.show(&records)?;
        }

        Command::Push { id, all } => {
            let engine = app.engine()?;
            let ctx = app.context(None).await?;
            let report = match id {
                Some(raw) => engine.push_record(&ctx, &ProductId::parse(&raw)?).await?,
                None if all => engine.push_all(&ctx).await?,
                None => engine.push_pending(&ctx).await?,
            };
            print_push(&report);
        }

        Command::Pull { scope } => {
            let engine = app.engine()?;
            let ctx = app.context(scope).await?;
            print_pull(&engine.pull(&ctx).await?);
        }

        Command::Sync { scope } => {
            let engine = app.engine()?;
            let ctx = app.context(scope).await?;
            let (pushed, pulled) = engine.synchronize(&ctx).await?;
            print_push(&pushed);
            print_pull(&pulled);
        }

        Command::Scan { count } => {
            let (mut intake, scanner) = ScanIntake::new(app.inventory.clone(), 16);

            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if !scanner.emit(line).await {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("stdin: {}", e);
                            break;
                        }
                    }
                }
            });

            while let Some(lookup) = intake.next_lookup().await {
                let lookup = match lookup {
                    Ok(lookup) => lookup,
                    Err(e) => {
                        log::error!("Lookup failed: {}", e);
                        continue;
                    }
                };
                match (lookup.existing, count) {
                    (Some(_), Some(location)) => {
                        let record = app.inventory.adjust(&lookup.id, location, 1).await?;
                        app.show(std::slice::from_ref(&record))?;
                    }
                    (Some(record), None) => app.show(std::slice::from_ref(&record))?,
                    (None, _) => println!("{}: new product", lookup.id),
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    run(cli).await
}
