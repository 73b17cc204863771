//! Best-effort ledger of processed verify and IPN events.
//!
//! The ledger suppresses duplicate work within a TTL. It is a hint, not a
//! correctness mechanism: the conditional status update and the unique
//! order insert hold the invariants on their own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::entities::processed_events::{IsEventProcessed, MarkEventProcessed, PurgeExpiredEvents};
use crate::framework::DatabaseProcessor;

/// Default lifetime of a ledger entry.
pub const DEFAULT_LEDGER_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Key-value store with per-key expiry.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether `key` is present and not expired.
    async fn contains(&self, key: &str) -> Result<bool, LedgerError>;

    /// Insert `key`, or refresh its expiry.
    async fn insert(&self, key: &str, ttl: Duration) -> Result<(), LedgerError>;

    /// Remove expired keys. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, LedgerError>;
}

/// Process-local store. Entries do not survive restarts and are not shared
/// between instances.
#[derive(Debug, Default)]
pub struct MemoryIdempotencyStore {
    entries: RwLock<HashMap<String, Instant>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn contains(&self, key: &str) -> Result<bool, LedgerError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(false),
                Some(expires_at) if *expires_at > now => return Ok(true),
                Some(_) => {}
            }
        }
        // Expired: drop it lazily.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|expires_at| *expires_at <= now) {
            entries.remove(key);
        }
        Ok(false)
    }

    async fn insert(&self, key: &str, ttl: Duration) -> Result<(), LedgerError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, LedgerError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

/// Store backed by the `processed_events` table, shared by every instance
/// using the same database.
#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    processor: DatabaseProcessor,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            processor: DatabaseProcessor { pool },
        }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn contains(&self, key: &str) -> Result<bool, LedgerError> {
        Ok(self
            .processor
            .process(IsEventProcessed {
                event_key: key.to_string(),
            })
            .await?)
    }

    async fn insert(&self, key: &str, ttl: Duration) -> Result<(), LedgerError> {
        Ok(self
            .processor
            .process(MarkEventProcessed {
                event_key: key.to_string(),
                ttl_secs: ttl.as_secs_f64(),
            })
            .await?)
    }

    async fn purge_expired(&self) -> Result<u64, LedgerError> {
        Ok(self.processor.process(PurgeExpiredEvents).await?)
    }
}

/// The flow that processed a tracking id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerEvent {
    Verify,
    Ipn,
}

impl LedgerEvent {
    fn prefix(self) -> &'static str {
        match self {
            LedgerEvent::Verify => "verify",
            LedgerEvent::Ipn => "ipn",
        }
    }

    /// Ledger key for this event and tracking id, e.g. `verify:ABC`.
    pub fn key(self, tracking_id: &str) -> String {
        format!("{}:{}", self.prefix(), tracking_id)
    }
}

/// Records `(event, tracking id)` pairs with a TTL.
///
/// Store failures are logged and swallowed.
#[derive(Clone)]
pub struct IdempotencyLedger {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// A ledger over a fresh process-local store with the default TTL.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryIdempotencyStore::new()), DEFAULT_LEDGER_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn mark_processed(&self, event: LedgerEvent, tracking_id: &str) {
        let key = event.key(tracking_id);
        if let Err(e) = self.store.insert(&key, self.ttl).await {
            tracing::warn!(key = %key, error = %e, "Failed to record processed event");
        }
    }

    pub async fn is_processed(&self, event: LedgerEvent, tracking_id: &str) -> bool {
        let key = event.key(tracking_id);
        match self.store.contains(&key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read processed event");
                false
            }
        }
    }

    /// Remove expired entries from the underlying store.
    pub async fn sweep(&self) -> Result<u64, LedgerError> {
        self.store.purge_expired().await
    }
}

impl std::fmt::Debug for IdempotencyLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyLedger")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
