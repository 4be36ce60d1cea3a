use clap::Parser;
use collection_saga::application::allocation::AllocationEngine;
use collection_saga::application::compensation::CompensationHandler;
use collection_saga::application::orchestrator::{CollectionSaga, SagaPorts, SagaSettings};
use collection_saga::application::workers::SagaRuntime;
use collection_saga::config::Config;
use collection_saga::domain::ports::{
    CollectionStore, CollectionStoreRef, CollectorDirectory, CollectorDirectoryRef, MessageBusRef,
    WalletServiceRef,
};
use collection_saga::infrastructure::in_memory::{
    InMemoryCategoryCatalog, InMemoryCollectionStore, InMemoryCollectorDirectory,
    InMemoryPaymentGateway, InMemoryStagingCache, InMemoryWallet,
};
use collection_saga::infrastructure::in_memory_bus::InMemoryBus;
use collection_saga::interfaces::csv::collection_writer::CollectionWriter;
use collection_saga::interfaces::csv::command_reader::CommandReader;
use collection_saga::interfaces::csv::seed_reader::{CategoryReader, CollectorReader};
use collection_saga::interfaces::script::ScriptDriver;
use collection_saga::observability::init_logging;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Saga script CSV file
    input: PathBuf,

    /// Category catalog CSV (category_id,name,rate)
    #[arg(long)]
    categories: PathBuf,

    /// Collector roster CSV (collector_id,service_area,max_capacity,blocked,verification)
    #[arg(long)]
    collectors: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

fn in_memory_storage() -> (CollectionStoreRef, CollectorDirectoryRef) {
    (
        Arc::new(InMemoryCollectionStore::new()),
        Arc::new(InMemoryCollectorDirectory::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_storage(db_path: Option<PathBuf>) -> Result<(CollectionStoreRef, CollectorDirectoryRef)> {
    use collection_saga::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(&path).into_diagnostic()?;
            info!(path = %path.display(), "Using RocksDB storage");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_storage()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_storage(db_path: Option<PathBuf>) -> Result<(CollectionStoreRef, CollectorDirectoryRef)> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_storage())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().into_diagnostic()?;
    init_logging(config.log_format);

    let (collections, directory) = open_storage(cli.db_path)?;

    let catalog = Arc::new(InMemoryCategoryCatalog::new());
    for category in CategoryReader::new(File::open(&cli.categories).into_diagnostic()?).categories() {
        catalog.insert(category.into_diagnostic()?).await;
    }
    for collector in CollectorReader::new(File::open(&cli.collectors).into_diagnostic()?).collectors() {
        let collector = collector.into_diagnostic()?;
        let id = collector.collector_id.clone();
        if !directory.register(collector).await.into_diagnostic()? {
            info!(collector_id = %id, "Collector already known, keeping stored workload");
        }
    }

    let payments = Arc::new(InMemoryPaymentGateway::new());
    let bus: MessageBusRef = Arc::new(InMemoryBus::new(config.max_deliveries, config.retry_backoff));
    let saga = Arc::new(CollectionSaga::new(
        SagaPorts {
            staging: Arc::new(InMemoryStagingCache::new()),
            collections: collections.clone(),
            allocator: Arc::new(AllocationEngine::new(directory.clone())),
            catalog,
            payments: payments.clone(),
            bus: bus.clone(),
        },
        SagaSettings::from(&config),
    ));
    let wallet: WalletServiceRef = Arc::new(InMemoryWallet::new());
    let compensation = Arc::new(CompensationHandler::new(
        directory,
        collections.clone(),
        payments.clone(),
        wallet.clone(),
    ));
    let runtime = SagaRuntime::start(saga.clone(), compensation, bus.clone(), &config);
    let mut driver = ScriptDriver::new(saga, bus, payments, wallet, collections.clone());

    let file = File::open(cli.input).into_diagnostic()?;
    for (row, command) in CommandReader::new(file).commands().enumerate() {
        match command {
            Ok(command) => {
                if let Err(e) = driver.apply(command).await {
                    warn!(row = row + 1, error = %e, "Command failed");
                }
            }
            Err(e) => warn!(row = row + 1, error = %e, "Skipping unreadable row"),
        }
        runtime.wait_idle().await.into_diagnostic()?;
    }
    runtime.shutdown().await;

    let stdout = io::stdout();
    let mut writer = CollectionWriter::new(stdout.lock());
    writer
        .write_collections(collections.all().await.into_diagnostic()?)
        .into_diagnostic()?;

    Ok(())
}
