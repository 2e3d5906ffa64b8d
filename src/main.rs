use clap::Parser;
use creator_ledger::application::context::{Context, ProviderRegistry};
use creator_ledger::application::engine::PaymentEngine;
use creator_ledger::config::EngineConfig;
use creator_ledger::domain::ports::{KycStatus, Stores};
use creator_ledger::infrastructure::in_memory::in_memory_stores;
use creator_ledger::infrastructure::notifier::StaticKycDirectory;
use creator_ledger::interfaces::csv::operation_reader::OperationReader;
use creator_ledger::interfaces::csv::wallet_writer::WalletWriter;
use creator_ledger::interfaces::replay::Replayer;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "CREATOR_LEDGER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Engine configuration as JSON (optional). Defaults apply otherwise.
    #[arg(long, env = "CREATOR_LEDGER_CONFIG")]
    config: Option<PathBuf>,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    use creator_ledger::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(&path).into_diagnostic()?;
            tracing::info!(path = %path.display(), "using persistent storage");
            Ok(store.stores())
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    let stores = open_stores(cli.db_path)?;

    // Replayed users are treated as verified.
    let ctx = Context::new(stores, ProviderRegistry::sandbox(), config)
        .with_kyc(Arc::new(StaticKycDirectory::new(KycStatus::Approved)));
    let mut replayer = Replayer::new(PaymentEngine::new(ctx));

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for (line, record) in reader.operations().enumerate() {
        match record {
            Ok(record) => {
                if let Err(e) = replayer.apply(record).await {
                    eprintln!("Error processing operation {}: {}", line + 1, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading operation {}: {}", line + 1, e);
            }
        }
    }

    let wallets = replayer.wallets().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer
        .write_wallets(wallets.iter().map(|(label, wallet)| (label.as_str(), wallet)))
        .into_diagnostic()?;

    Ok(())
}
