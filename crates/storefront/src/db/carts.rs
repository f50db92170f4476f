//! Cart persistence in `PostgreSQL`.
//!
//! - [`PgCartStore`] keeps one JSONB document per cart key in
//!   `storefront.cart`. A trigger announces every change on the
//!   `storefront_cart_changed` channel. Each store handle (and its clones)
//!   holds one [`CartChangeHub`]: a single listener connection whose
//!   notifications are fanned out to the subscriptions of the named key.
//! - [`PgCartSlot`] keeps a visitor's anonymous cart in
//!   `storefront.visitor_cart`, so server-rendered sessions get the same
//!   local-slot semantics a browser has.
//!
//! Queries are built at runtime with `sqlx::query` so the crate compiles
//! without a live database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use sqlx::types::{Json, JsonValue};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use tienda_core::{CartKey, CartLineItem, UserId};

use super::RepositoryError;
use crate::store::{
    CartDocument, LocalCartStore, LocalSlot, RemoteCartStore, RemoteSubscription, SCHEMA_VERSION,
    StoreError, decode_local_slot, encode_local_slot,
};

/// Notification channel fed by the `storefront.cart` trigger.
pub const CART_CHANGED_CHANNEL: &str = "storefront_cart_changed";

/// Pause before re-establishing a failed listener.
const LISTEN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Change signals buffered per key. A lagging subscriber re-reads once.
const CHANGE_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    user_id: Option<String>,
    items: JsonValue,
    schema_version: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for CartDocument {
    type Error = RepositoryError;

    fn try_from(row: CartRow) -> Result<Self, Self::Error> {
        let items: Vec<CartLineItem> = if row.items.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(row.items).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid cart items in database: {e}"))
            })?
        };

        Ok(Self {
            schema_version: u32::try_from(row.schema_version).unwrap_or(SCHEMA_VERSION),
            user_id: row.user_id.map(UserId::new),
            items,
            updated_at: row.updated_at,
        })
    }
}

async fn fetch_document(pool: &PgPool, key: &CartKey) -> Result<Option<CartDocument>, StoreError> {
    let row = sqlx::query_as::<_, CartRow>(
        r"
        SELECT user_id, items, schema_version, updated_at
        FROM storefront.cart
        WHERE cart_key = $1
        ",
    )
    .bind(key.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CartDocument::try_from).transpose()?)
}

// =============================================================================
// PgCartStore
// =============================================================================

/// Remote cart store backed by `storefront.cart`.
///
/// Clones share one [`CartChangeHub`], so every subscription made through
/// them rides the same listener connection.
#[derive(Debug, Clone)]
pub struct PgCartStore {
    pool: PgPool,
    hub: Arc<CartChangeHub>,
}

impl PgCartStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hub: Arc::new(CartChangeHub::default()),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl RemoteCartStore for PgCartStore {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn read(&self, key: &CartKey) -> Result<Option<CartDocument>, StoreError> {
        fetch_document(&self.pool, key).await
    }

    #[instrument(skip(self, key, items), fields(key = %key, lines = items.len()))]
    async fn write(&self, key: &CartKey, items: &[CartLineItem]) -> Result<DateTime<Utc>, StoreError> {
        // Stamps of one row strictly increase even if two writes share a
        // transaction timestamp.
        let stamped = sqlx::query_scalar::<_, DateTime<Utc>>(
            r"
            INSERT INTO storefront.cart AS cart (cart_key, user_id, items, schema_version, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (cart_key) DO UPDATE
            SET items = EXCLUDED.items,
                schema_version = EXCLUDED.schema_version,
                updated_at = GREATEST(now(), cart.updated_at + interval '1 microsecond')
            RETURNING updated_at
            ",
        )
        .bind(key.as_str())
        .bind(key.user_id().map(UserId::into_inner))
        .bind(Json(items))
        .bind(SCHEMA_VERSION.cast_signed())
        .fetch_one(&self.pool)
        .await?;

        Ok(stamped)
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn delete(&self, key: &CartKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM storefront.cart WHERE cart_key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn subscribe(&self, key: &CartKey) -> Result<RemoteSubscription, StoreError> {
        // Listen before returning so an unreachable database fails the call.
        self.hub.ensure_listening(&self.pool).await?;
        let changes = self.hub.watch(key);
        let pool = self.pool.clone();
        let watched = key.clone();

        Ok(RemoteSubscription::spawn(key.clone(), move |sender| {
            follow_cart(pool, watched, changes, sender)
        }))
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn create_if_absent(&self, key: &CartKey) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO storefront.cart (cart_key, user_id, items, schema_version)
            VALUES ($1, $2, '[]'::jsonb, $3)
            ON CONFLICT (cart_key) DO NOTHING
            ",
        )
        .bind(key.as_str())
        .bind(key.user_id().map(UserId::into_inner))
        .bind(SCHEMA_VERSION.cast_signed())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// CartChangeHub
// =============================================================================

/// One `LISTEN` connection shared by every subscription of a store.
///
/// The listener task is started by the first subscription and restarted by
/// a later one if it has died. Each notification payload is a cart key; the
/// hub signals that key's subscribers, which re-read the document
/// themselves.
#[derive(Debug, Default)]
pub struct CartChangeHub {
    channels: Mutex<HashMap<String, broadcast::Sender<()>>>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CartChangeHub {
    /// Start the shared listener unless it is already running.
    async fn ensure_listening(self: &Arc<Self>, pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut task = self.listener.lock().await;
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        let listener = listen(pool).await?;
        debug!(channel = CART_CHANGED_CHANNEL, "Started shared cart listener");
        *task = Some(tokio::spawn(run_listener(
            Arc::downgrade(self),
            pool.clone(),
            listener,
        )));
        Ok(())
    }

    /// Receiver signalled on every change to `key`.
    fn watch(&self, key: &CartKey) -> broadcast::Receiver<()> {
        lock(&self.channels)
            .entry(key.as_str().to_owned())
            .or_insert_with(|| broadcast::channel(CHANGE_CAPACITY).0)
            .subscribe()
    }

    /// Signal the subscribers of `key`, dropping the entry once they are
    /// all gone.
    fn dispatch(&self, key: &str) {
        let mut channels = lock(&self.channels);
        let Some(sender) = channels.get(key) else {
            return;
        };
        if sender.send(()).is_err() {
            channels.remove(key);
        }
    }

    /// Signal every key, after a reconnect may have missed changes.
    fn dispatch_all(&self) {
        lock(&self.channels).retain(|_, sender| sender.send(()).is_ok());
    }

    /// Number of keys with live subscribers.
    #[must_use]
    pub fn watched_keys(&self) -> usize {
        lock(&self.channels).len()
    }
}

impl Drop for CartChangeHub {
    fn drop(&mut self) {
        if let Some(task) = self.listener.get_mut().take() {
            task.abort();
        }
    }
}

async fn listen(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CART_CHANGED_CHANNEL).await?;
    Ok(listener)
}

/// Listener loop: forward each notification to the hub until the hub is
/// dropped, reconnecting on failure.
async fn run_listener(hub: Weak<CartChangeHub>, pool: PgPool, mut listener: PgListener) {
    loop {
        match listener.recv().await {
            Ok(notification) => {
                let Some(hub) = hub.upgrade() else {
                    return;
                };
                hub.dispatch(notification.payload());
            }
            Err(e) => {
                warn!(error = %e, "Cart listener failed, reconnecting");
                tokio::time::sleep(LISTEN_RETRY_DELAY).await;
                match listen(&pool).await {
                    Ok(fresh) => {
                        listener = fresh;
                        let Some(hub) = hub.upgrade() else {
                            return;
                        };
                        hub.dispatch_all();
                    }
                    Err(e) => warn!(error = %e, "Cart listener reconnect failed"),
                }
            }
        }
    }
}

/// Feeder loop for one subscription: replay the current document, then
/// re-read it whenever the hub signals `key`.
async fn follow_cart(
    pool: PgPool,
    key: CartKey,
    mut changes: broadcast::Receiver<()>,
    sender: mpsc::Sender<CartDocument>,
) {
    if !push_current(&pool, &key, &sender).await {
        return;
    }

    loop {
        match changes.recv().await {
            Ok(()) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(key = %key, skipped, "Cart change signals coalesced");
            }
            Err(RecvError::Closed) => return,
        }
        if !push_current(&pool, &key, &sender).await {
            return;
        }
    }
}

/// Send the current document if there is one. Returns `false` once the
/// subscriber is gone.
async fn push_current(pool: &PgPool, key: &CartKey, sender: &mpsc::Sender<CartDocument>) -> bool {
    match fetch_document(pool, key).await {
        Ok(Some(document)) => sender.send(document).await.is_ok(),
        Ok(None) => {
            debug!(key = %key, "Cart document absent, nothing to push");
            !sender.is_closed()
        }
        Err(e) => {
            warn!(error = %e, key = %key, "Failed to read pushed cart");
            !sender.is_closed()
        }
    }
}

// =============================================================================
// PgCartSlot
// =============================================================================

/// Local slot for one visitor, stored as raw text in
/// `storefront.visitor_cart`.
#[derive(Debug, Clone)]
pub struct PgCartSlot {
    pool: PgPool,
    visitor_id: String,
}

impl PgCartSlot {
    #[must_use]
    pub fn new(pool: PgPool, visitor_id: impl Into<String>) -> Self {
        Self {
            pool,
            visitor_id: visitor_id.into(),
        }
    }

    #[must_use]
    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }
}

impl LocalCartStore for PgCartSlot {
    #[instrument(skip(self), fields(visitor = %self.visitor_id))]
    async fn load(&self) -> Result<LocalSlot, StoreError> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM storefront.visitor_cart WHERE visitor_id = $1",
        )
        .bind(&self.visitor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(decode_local_slot(payload.as_deref()))
    }

    #[instrument(skip(self, items), fields(visitor = %self.visitor_id, lines = items.len()))]
    async fn save(&self, items: &[CartLineItem]) -> Result<(), StoreError> {
        let payload = encode_local_slot(items)?;
        sqlx::query(
            r"
            INSERT INTO storefront.visitor_cart (visitor_id, payload, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (visitor_id) DO UPDATE
            SET payload = EXCLUDED.payload, updated_at = now()
            ",
        )
        .bind(&self.visitor_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(visitor = %self.visitor_id))]
    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM storefront.visitor_cart WHERE visitor_id = $1")
            .bind(&self.visitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
