#![allow(dead_code)]

use chrono::NaiveDate;
use collection_saga::application::allocation::AllocationEngine;
use collection_saga::application::compensation::CompensationHandler;
use collection_saga::application::orchestrator::{
    CollectionRequest, CollectionSaga, PriceQuote, SagaPorts, SagaSettings,
};
use collection_saga::application::workers::SagaRuntime;
use collection_saga::config::Config;
use collection_saga::domain::category::Category;
use collection_saga::domain::collection::{LineItem, PaymentMethod};
use collection_saga::domain::collector::Collector;
use collection_saga::domain::events::{PaymentCompleted, SagaMessage};
use collection_saga::domain::money::{Money, Rate};
use collection_saga::domain::payment::{PaymentRecord, PaymentRecordStatus};
use collection_saga::domain::ports::{CollectorDirectory, MessageBus, WalletServiceRef};
use collection_saga::infrastructure::in_memory::{
    InMemoryCategoryCatalog, InMemoryCollectionStore, InMemoryCollectorDirectory,
    InMemoryPaymentGateway, InMemoryStagingCache, InMemoryWallet,
};
use collection_saga::infrastructure::in_memory_bus::InMemoryBus;
use rust_decimal_macros::dec;
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

/// Small timeouts and a sweep that never fires on its own.
pub fn test_config() -> Config {
    Config {
        max_deliveries: 3,
        retry_backoff: Duration::from_millis(1),
        sweep_interval: Duration::from_secs(3600),
        receive_timeout: Duration::from_millis(10),
        workers_per_queue: 2,
        ..Config::default()
    }
}

/// The whole saga wired in process, with its workers running.
pub struct Harness {
    pub saga: Arc<CollectionSaga>,
    pub bus: InMemoryBus,
    pub store: Arc<InMemoryCollectionStore>,
    pub directory: Arc<InMemoryCollectorDirectory>,
    pub payments: Arc<InMemoryPaymentGateway>,
    pub wallet: Arc<InMemoryWallet>,
    pub runtime: SagaRuntime,
}

impl Harness {
    pub async fn start(collectors: Vec<Collector>) -> Self {
        Self::start_with_wallet(collectors, None).await
    }

    /// `refund_wallet` replaces the wallet the compensation side credits.
    pub async fn start_with_wallet(
        collectors: Vec<Collector>,
        refund_wallet: Option<WalletServiceRef>,
    ) -> Self {
        let config = test_config();
        let bus = InMemoryBus::new(config.max_deliveries, config.retry_backoff).with_history();
        let store = Arc::new(InMemoryCollectionStore::new());
        let directory = Arc::new(InMemoryCollectorDirectory::new());
        let payments = Arc::new(InMemoryPaymentGateway::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let catalog = Arc::new(InMemoryCategoryCatalog::new());

        catalog
            .insert(Category {
                category_id: "A".to_string(),
                name: "Paper".to_string(),
                rate: Rate::new(dec!(30)).unwrap(),
            })
            .await;
        catalog
            .insert(Category {
                category_id: "B".to_string(),
                name: "Metal".to_string(),
                rate: Rate::new(dec!(45.5)).unwrap(),
            })
            .await;
        for collector in collectors {
            directory.register(collector).await.unwrap();
        }

        let saga = Arc::new(CollectionSaga::new(
            SagaPorts {
                staging: Arc::new(InMemoryStagingCache::new()),
                collections: store.clone(),
                allocator: Arc::new(AllocationEngine::new(directory.clone())),
                catalog,
                payments: payments.clone(),
                bus: Arc::new(bus.clone()),
            },
            SagaSettings::from(&config),
        ));
        let refund_wallet: WalletServiceRef = match refund_wallet {
            Some(custom) => custom,
            None => wallet.clone(),
        };
        let compensation = Arc::new(CompensationHandler::new(
            directory.clone(),
            store.clone(),
            payments.clone(),
            refund_wallet,
        ));
        let runtime = SagaRuntime::start(saga.clone(), compensation, Arc::new(bus.clone()), &config);

        Self {
            saga,
            bus,
            store,
            directory,
            payments,
            wallet,
            runtime,
        }
    }

    pub async fn request(&self, user_id: &str, items: &[(&str, u32)]) -> PriceQuote {
        self.saga
            .validate_and_price(CollectionRequest {
                user_id: user_id.to_string(),
                items: items
                    .iter()
                    .map(|(id, qty)| LineItem {
                        category_id: id.to_string(),
                        qty: *qty,
                    })
                    .collect(),
                service_area: "north".to_string(),
                preferred_date: date(),
            })
            .await
            .unwrap()
    }

    /// Records the advance payment as settled and publishes `payment.completed`.
    pub async fn pay(&self, user_id: &str, payment_id: &str, amount: Money) {
        self.payments
            .record(PaymentRecord {
                payment_id: payment_id.to_string(),
                user_id: user_id.to_string(),
                amount,
                status: PaymentRecordStatus::Success,
                method: PaymentMethod::Digital,
            })
            .await;
        let event = PaymentCompleted {
            user_id: user_id.to_string(),
            payment_id: payment_id.to_string(),
            amount: Some(amount),
        };
        self.bus
            .publish(PaymentCompleted::QUEUE, event.encode().unwrap())
            .await
            .unwrap();
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.runtime.wait_idle())
            .await
            .expect("saga did not go idle")
            .unwrap();
    }

    pub async fn tasks_on(&self, collector_id: &str) -> u32 {
        self.directory
            .get(collector_id)
            .await
            .unwrap()
            .unwrap()
            .tasks_on(date())
    }
}

pub const CATEGORIES_CSV: &str = "category_id,name,rate\nA,Paper,30\nB,Metal,45.5\n";

pub fn write_file(path: &Path, contents: &str) -> Result<(), Error> {
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

/// Writes a script where each of `users` users requests and pays for one pickup.
pub fn generate_script(path: &Path, users: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record([
        "op",
        "user",
        "payment",
        "items",
        "area",
        "date",
        "method",
        "amount",
        "final_payment",
        "reason",
    ])?;
    for i in 1..=users {
        let user = format!("u{i}");
        let payment = format!("p{i:04}");
        wtr.write_record([
            "request", &user, "", "A:1", "north", "2026-10-20", "", "", "", "",
        ])?;
        wtr.write_record(["pay", &user, &payment, "", "", "", "", "", "", ""])?;
    }
    wtr.flush()?;
    Ok(())
}
