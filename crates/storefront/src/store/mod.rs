//! Cart persistence contracts.
//!
//! The engine talks to two passive stores:
//!
//! - [`LocalCartStore`] - one durable slot per browser (or native client)
//!   holding the anonymous cart.
//! - [`RemoteCartStore`] - one [`CartDocument`] per [`CartKey`] in the
//!   hosted document database, with push notifications on change.
//!
//! Neither store knows anything about cart semantics: they save and return
//! line-item lists.
//!
//! # Implementations
//!
//! | Store | Local | Remote |
//! |-------|-------|--------|
//! | In-process (tests, demos) | [`MemoryCartSlot`] | [`MemoryCartStore`] |
//! | JSON file (native clients, CLI) | [`FileCartSlot`] | - |
//! | `PostgreSQL` (server) | [`crate::db::carts::PgCartSlot`] | [`crate::db::carts::PgCartStore`] |

mod file;
mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tienda_core::{CartKey, CartLineItem, UserId};

use crate::db::RepositoryError;

pub use file::FileCartSlot;
pub use memory::{MemoryCartSlot, MemoryCartStore};

/// Current version of both the local record and the remote document.
pub const SCHEMA_VERSION: u32 = 1;

/// Pushed documents buffered per subscription before the feeder waits.
const SUBSCRIPTION_BUFFER: usize = 16;

// =============================================================================
// Errors
// =============================================================================

/// A read, write or delete against a cart store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the cart failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] RepositoryError),

    /// The store refused or could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(RepositoryError::Database(err))
    }
}

// =============================================================================
// Local slot
// =============================================================================

/// What a local slot held when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSlot {
    /// Nothing stored.
    Absent,
    /// A decodable cart (possibly empty).
    Present(Vec<CartLineItem>),
    /// Something is stored but it does not decode as a cart.
    Corrupt { reason: String },
}

impl LocalSlot {
    /// The stored items; absent and corrupt slots read as empty.
    #[must_use]
    pub fn into_items(self) -> Vec<CartLineItem> {
        match self {
            Self::Present(items) => items,
            Self::Absent | Self::Corrupt { .. } => Vec::new(),
        }
    }
}

/// On-disk shape of a local slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCartRecord {
    #[serde(default = "schema_version")]
    pub version: u32,
    #[serde(default)]
    pub items: Vec<CartLineItem>,
}

impl LocalCartRecord {
    #[must_use]
    pub fn new(items: &[CartLineItem]) -> Self {
        Self {
            version: SCHEMA_VERSION,
            items: items.to_vec(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLocalCart {
    Versioned(LocalCartRecord),
    /// Bare array written by older clients.
    Legacy(Vec<CartLineItem>),
}

const fn schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Decode a raw slot payload.
///
/// `None` and blank payloads are [`LocalSlot::Absent`]. Both the versioned
/// record and the legacy bare array are accepted.
#[must_use]
pub fn decode_local_slot(raw: Option<&str>) -> LocalSlot {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return LocalSlot::Absent;
    };

    match serde_json::from_str::<StoredLocalCart>(raw) {
        Ok(StoredLocalCart::Versioned(record)) => LocalSlot::Present(record.items),
        Ok(StoredLocalCart::Legacy(items)) => LocalSlot::Present(items),
        Err(e) => LocalSlot::Corrupt {
            reason: e.to_string(),
        },
    }
}

/// Encode items as a versioned slot payload.
///
/// # Errors
///
/// Returns `serde_json::Error` if serialization fails.
pub fn encode_local_slot(items: &[CartLineItem]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&LocalCartRecord::new(items))
}

/// The durable per-browser slot for the anonymous cart.
pub trait LocalCartStore: Send + Sync + 'static {
    /// Read the slot.
    fn load(&self) -> impl Future<Output = Result<LocalSlot, StoreError>> + Send;

    /// Overwrite the slot with `items`.
    fn save(&self, items: &[CartLineItem]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove the slot entirely.
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// =============================================================================
// Remote document
// =============================================================================

/// A cart as stored in the remote document database.
///
/// Every field is default-filled when absent, so documents written by older
/// clients (or by hand) still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartDocument {
    #[serde(default = "schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub items: Vec<CartLineItem>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CartDocument {
    /// A fresh document for `key` holding `items`.
    #[must_use]
    pub fn new(key: &CartKey, items: Vec<CartLineItem>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            user_id: key.user_id(),
            items,
            updated_at: Utc::now(),
        }
    }
}

/// The hosted per-identity cart store.
pub trait RemoteCartStore: Send + Sync + 'static {
    /// Point-in-time read.
    fn read(
        &self,
        key: &CartKey,
    ) -> impl Future<Output = Result<Option<CartDocument>, StoreError>> + Send;

    /// Create the document or replace its items, bumping `updated_at`.
    /// Safe to retry.
    ///
    /// Returns the `updated_at` the store stamped. Stamps of one document
    /// strictly increase, so a subscriber can tell this write's echo from a
    /// later change without comparing against its own clock.
    fn write(
        &self,
        key: &CartKey,
        items: &[CartLineItem],
    ) -> impl Future<Output = Result<DateTime<Utc>, StoreError>> + Send;

    /// Remove the document. A missing document is not an error.
    fn delete(&self, key: &CartKey) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Start receiving the latest document every time it changes, including
    /// changes made by other sessions under the same key.
    ///
    /// The current document, if any, is replayed first. Deletions are not
    /// delivered.
    fn subscribe(
        &self,
        key: &CartKey,
    ) -> impl Future<Output = Result<RemoteSubscription, StoreError>> + Send;

    /// Create an empty document if none exists. Returns whether one was
    /// created; existing items are never touched.
    fn create_if_absent(
        &self,
        key: &CartKey,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

// =============================================================================
// Subscription
// =============================================================================

/// A live feed of documents for one key.
///
/// A feeder task pushes documents into a bounded channel. Dropping the
/// subscription (or calling [`RemoteSubscription::unsubscribe`]) aborts the
/// feeder, which releases whatever it held (a watch receiver, a database
/// listener connection).
#[derive(Debug)]
pub struct RemoteSubscription {
    key: CartKey,
    receiver: mpsc::Receiver<CartDocument>,
    feeder: JoinHandle<()>,
}

impl RemoteSubscription {
    /// Spawn `feed` as the feeder task for `key`.
    ///
    /// `feed` receives the sending half and should return once sending
    /// fails (the subscriber is gone).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<F, Fut>(key: CartKey, feed: F) -> Self
    where
        F: FnOnce(mpsc::Sender<CartDocument>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let feeder = tokio::spawn(feed(sender));
        Self {
            key,
            receiver,
            feeder,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &CartKey {
        &self.key
    }

    /// Wait for the next pushed document. `None` once the feeder has
    /// stopped.
    pub async fn next(&mut self) -> Option<CartDocument> {
        self.receiver.recv().await
    }

    /// Stop delivery and release the feeder.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}
