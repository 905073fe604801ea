//! In-process document server.
//!
//! Speaks the bulk write contract the engine relies on: an ordered batch of
//! insert / replace-with-upsert / delete-many operations answered either with
//! per-command counts or a rejection carrying per-operation diagnostics.

pub mod collection;

use crate::bulk::command::WriteModel;
use crate::bulk::result::BulkWriteResult;
use crate::core::{DbError, Document, Result, matches_filter};
use collection::Collection;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub use collection::DUPLICATE_KEY_CODE;

// Deployments registered by endpoint address, shared by every pool opened against it
lazy_static! {
    static ref DEPLOYMENTS: std::sync::Mutex<HashMap<String, Arc<DocumentServer>>> =
        std::sync::Mutex::new(HashMap::new());
}

pub struct DocumentServer {
    address: String,
    collections: RwLock<HashMap<String, Arc<Mutex<Collection>>>>,
    available: AtomicBool,
    /// Simulated round-trip time per command, in microseconds
    latency_us: AtomicU64,
    commands: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl DocumentServer {
    /// Create an isolated server that is not registered under any endpoint.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_address("isolated"))
    }

    /// Get (or start) the deployment listening on `address`.
    pub fn for_endpoint(address: &str) -> Arc<Self> {
        let mut deployments = DEPLOYMENTS.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            deployments
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(Self::with_address(address))),
        )
    }

    fn with_address(address: &str) -> Self {
        Self {
            address: address.to_string(),
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency_us: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Toggle reachability; an unavailable server fails every request at the transport level.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    /// Number of bulk commands served so far.
    pub fn commands_served(&self) -> u64 {
        self.commands.load(Ordering::SeqCst)
    }

    /// Highest number of commands observed executing at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DbError::ConnectionFailure(format!(
                "connection refused by {}",
                self.address
            )))
        }
    }

    async fn collection(&self, database: &str, name: &str) -> Arc<Mutex<Collection>> {
        let namespace = format!("{database}.{name}");
        if let Some(collection) = self.collections.read().await.get(&namespace) {
            return Arc::clone(collection);
        }

        let mut collections = self.collections.write().await;
        Arc::clone(
            collections
                .entry(namespace.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Collection::new(namespace)))),
        )
    }

    pub async fn create_unique_index(&self, database: &str, collection: &str, field: &str) -> Result<()> {
        let handle = self.collection(database, collection).await;
        let mut collection = handle.lock().await;
        collection.add_unique_field(field)
    }

    /// Execute one ordered batch; stops at the first failing operation.
    pub async fn execute_bulk(
        &self,
        database: &str,
        collection: &str,
        models: &[WriteModel],
    ) -> Result<BulkWriteResult> {
        self.check_available()?;

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let latency = self.latency_us.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_micros(latency)).await;
        }

        let result = if self.is_available() {
            let handle = self.collection(database, collection).await;
            let mut collection = handle.lock().await;
            collection.apply_ordered(models)
        } else {
            Err(DbError::ConnectionFailure(format!(
                "connection to {} reset during command",
                self.address
            )))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.commands.fetch_add(1, Ordering::SeqCst);
        result
    }

    pub async fn count_documents(&self, database: &str, collection: &str, filter: &Document) -> usize {
        let handle = self.collection(database, collection).await;
        let collection = handle.lock().await;
        collection.count(filter)
    }

    pub async fn find(&self, database: &str, collection: &str, filter: &Document) -> Vec<Document> {
        let handle = self.collection(database, collection).await;
        let collection = handle.lock().await;
        collection
            .documents()
            .iter()
            .filter(|document| matches_filter(document, filter))
            .cloned()
            .collect()
    }
}
