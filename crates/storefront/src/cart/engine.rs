//! The cart reconciliation engine.
//!
//! One [`CartEngine`] exists per application session. It owns the in-memory
//! [`Cart`], decides where that cart is loaded from and persisted to for the
//! current identity, and keeps it in sync with other sessions of the same
//! signed-in user.
//!
//! # State
//!
//! Everything mutable sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Loads are serialized by a separate async mutex, so a
//! rapid login/logout/login runs its load procedures one after another and
//! the one-shot migration cannot run twice at once.
//!
//! # Persistence
//!
//! Mutations apply to memory synchronously, publish a new [`CartSnapshot`],
//! and then spawn a detached task that writes the full item list to the
//! store for the current identity. There is no queue: overlapping writes
//! race and the last one to complete wins. The remote store replaces whole
//! documents without a version check, so two sessions writing at once can
//! lose an update.
//!
//! # Live sync
//!
//! After a signed-in load the engine subscribes to the remote document. The
//! listener task holds only a [`Weak`] reference to the engine and checks
//! the identity epoch the subscription was started under before applying a
//! push, so a push racing a logout or [`CartEngine::detach`] is dropped.
//!
//! Replays are recognized by the `updated_at` the store stamped. It is
//! compared only with other stamps from the same store, never with the
//! local clock.
//! While one of this engine's writes is in flight, pushes are held back and
//! the newest one is applied after the write returns if it is still newer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use tienda_core::{
    AddOutcome, Cart, CartError, CartKey, CartLineItem, ProductId, ProductSnapshot, RemoveOutcome,
    UpdateOutcome, UserId,
};

use super::notice::{CartNotice, NoticeInbox};
use crate::store::{
    CartDocument, LocalCartStore, LocalSlot, RemoteCartStore, RemoteSubscription, StoreError,
};

/// Notices buffered per receiver before the slowest one starts lagging.
const NOTICE_CAPACITY: usize = 64;

/// Result of reading the stores during a load: the outcome, the items to
/// show (`None` keeps the current cart) and the remote `updated_at` they
/// came from.
type Loaded = (LoadOutcome, Option<Vec<CartLineItem>>, Option<DateTime<Utc>>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Public types
// =============================================================================

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CartPhase {
    /// A load/merge is in progress (or has never run).
    Loading,
    /// The cart for the current identity is loaded.
    Ready,
}

/// Point-in-time view of the engine, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub cart_key: CartKey,
    pub phase: CartPhase,
    pub items: Vec<CartLineItem>,
    pub total_items: u32,
    pub total_price: Decimal,
}

impl CartSnapshot {
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase == CartPhase::Loading
    }
}

/// Where a load took the cart from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The signed-in user's remote document.
    Remote,
    /// The local slot was copied to a new remote document and cleared.
    Migrated { lines: usize },
    /// The migration write failed; the local slot was kept and its items
    /// are shown.
    MigrationFailed { lines: usize },
    /// The anonymous local slot.
    Local,
    /// Nothing was stored anywhere.
    Empty,
    /// Reading failed; the previous in-memory cart is still shown.
    Failed,
    /// The engine was detached or re-identified before the load finished.
    Superseded,
}

// =============================================================================
// Engine
// =============================================================================

/// The cart reconciliation engine for one session.
///
/// Cloning is cheap and every clone drives the same cart.
pub struct CartEngine<L, R> {
    inner: Arc<EngineInner<L, R>>,
}

impl<L, R> Clone for CartEngine<L, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L, R> std::fmt::Debug for CartEngine<L, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("CartEngine")
            .field("cart_key", &state.key)
            .field("phase", &state.phase)
            .field("epoch", &state.epoch)
            .field("lines", &state.cart.lines().len())
            .finish_non_exhaustive()
    }
}

struct EngineInner<L, R> {
    local: L,
    remote: R,
    state: Mutex<EngineState>,
    load_lock: tokio::sync::Mutex<()>,
    snapshots: watch::Sender<CartSnapshot>,
    notices: broadcast::Sender<CartNotice>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

struct EngineState {
    identity: Option<UserId>,
    key: CartKey,
    phase: CartPhase,
    /// Bumped on every load and on detach; stale listeners compare against it.
    epoch: u64,
    /// Whether any load has completed.
    loaded: bool,
    cart: Cart,
    /// Newest store-stamped `updated_at` this engine has read, applied or
    /// written. Pushes stamped at or before it are replays.
    remote_seen: Option<DateTime<Utc>>,
    /// Remote writes and deletes started in this epoch and not yet returned.
    writes_in_flight: usize,
    /// Newest push held back while `writes_in_flight > 0`.
    deferred: Option<CartDocument>,
    listener: Option<JoinHandle<()>>,
}

impl EngineState {
    fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            cart_key: self.key.clone(),
            phase: self.phase,
            items: self.cart.lines().to_vec(),
            total_items: self.cart.total_items(),
            total_price: self.cart.total_price(),
        }
    }

    fn observe_remote(&mut self, stamped: DateTime<Utc>) {
        if self.remote_seen.is_none_or(|seen| stamped > seen) {
            self.remote_seen = Some(stamped);
        }
    }

    /// Start a remote write or delete in the current epoch.
    fn begin_write(&mut self) -> u64 {
        self.writes_in_flight += 1;
        self.epoch
    }

    fn is_replay(&self, document: &CartDocument) -> bool {
        self.remote_seen
            .is_some_and(|seen| document.updated_at <= seen)
    }

    fn replace_cart(&mut self, document: CartDocument) {
        let (cart, discarded) = Cart::from_lines(document.items);
        if discarded > 0 {
            warn!(cart_key = %self.key, discarded, "Dropped invalid lines from pushed cart");
        }
        self.cart = cart;
        self.observe_remote(document.updated_at);
    }

    fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl<L, R> Drop for EngineInner<L, R> {
    fn drop(&mut self) {
        lock(&self.state).stop_listener();
    }
}

impl<L, R> EngineInner<L, R> {
    fn publish(&self, state: &EngineState) {
        self.snapshots.send_replace(state.snapshot());
    }

    fn notify(&self, notice: CartNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    /// Apply a pushed document if the subscription is still current.
    /// Returns `false` once the subscription has gone stale.
    fn apply_remote(&self, epoch: u64, document: CartDocument) -> bool {
        let mut state = lock(&self.state);
        if state.epoch != epoch {
            return false;
        }
        if state.is_replay(&document) {
            debug!(cart_key = %state.key, "Skipping replayed cart document");
            return true;
        }
        if state.writes_in_flight > 0 {
            if state
                .deferred
                .as_ref()
                .is_none_or(|held| document.updated_at > held.updated_at)
            {
                state.deferred = Some(document);
            }
            debug!(cart_key = %state.key, "Holding cart push until local writes finish");
            return true;
        }

        state.replace_cart(document);
        self.publish(&state);
        debug!(cart_key = %state.key, lines = state.cart.lines().len(), "Applied remote cart change");
        true
    }

    /// Account for a returned remote write. `stamped` is the store's stamp
    /// for a successful write; deletes and failures have none.
    fn finish_write(&self, epoch: u64, stamped: Option<DateTime<Utc>>) {
        let mut state = lock(&self.state);
        if state.epoch != epoch {
            return;
        }
        state.writes_in_flight = state.writes_in_flight.saturating_sub(1);
        if let Some(stamped) = stamped {
            state.observe_remote(stamped);
        }
        if state.writes_in_flight > 0 {
            return;
        }
        if let Some(document) = state.deferred.take() {
            if state.is_replay(&document) {
                debug!(cart_key = %state.key, "Dropping held cart push older than local write");
            } else {
                state.replace_cart(document);
                self.publish(&state);
                debug!(cart_key = %state.key, "Applied held remote cart change");
            }
        }
    }
}

impl<L: LocalCartStore, R: RemoteCartStore> CartEngine<L, R> {
    /// Create an engine in the `Loading` phase with an empty anonymous cart.
    ///
    /// Nothing is read until [`load`](Self::load) (or
    /// [`set_identity`](Self::set_identity)) runs.
    #[must_use]
    pub fn new(local: L, remote: R) -> Self {
        let state = EngineState {
            identity: None,
            key: CartKey::anonymous(),
            phase: CartPhase::Loading,
            epoch: 0,
            loaded: false,
            cart: Cart::new(),
            remote_seen: None,
            writes_in_flight: 0,
            deferred: None,
            listener: None,
        };
        let (snapshots, _) = watch::channel(state.snapshot());
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            inner: Arc::new(EngineInner {
                local,
                remote,
                state: Mutex::new(state),
                load_lock: tokio::sync::Mutex::new(()),
                snapshots,
                notices,
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn local(&self) -> &L {
        &self.inner.local
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    // =========================================================================
    // Load / merge
    // =========================================================================

    /// Load the cart for `user`, replacing whatever identity was active.
    ///
    /// Signed in: the remote document wins if it exists; otherwise a
    /// non-empty local slot is migrated to a new remote document and the
    /// slot is cleared once that write succeeds. Anonymous: the local slot
    /// is used as-is. Failures are reported as notices, never returned.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime (the live-sync listener is
    /// spawned).
    pub async fn load(&self, user: Option<UserId>) -> LoadOutcome {
        let _serialized = self.inner.load_lock.lock().await;
        self.load_locked(user, true).await
    }

    /// [`load`](Self::load) without starting live sync, for one-shot tools
    /// that read or migrate a cart and exit.
    pub async fn load_once(&self, user: Option<UserId>) -> LoadOutcome {
        let _serialized = self.inner.load_lock.lock().await;
        self.load_locked(user, false).await
    }

    /// The load procedure. Callers hold `load_lock`.
    #[instrument(skip(self, user), fields(user = ?user.as_ref().map(UserId::as_str)))]
    async fn load_locked(&self, user: Option<UserId>, live_sync: bool) -> LoadOutcome {
        let key = CartKey::resolve(user.as_ref());
        let epoch = {
            let mut state = lock(&self.inner.state);
            state.stop_listener();
            state.epoch += 1;
            state.identity = user;
            state.key = key.clone();
            state.phase = CartPhase::Loading;
            state.remote_seen = None;
            state.writes_in_flight = 0;
            state.deferred = None;
            self.inner.publish(&state);
            state.epoch
        };

        let (outcome, loaded, seen) = if key.is_anonymous() {
            self.load_anonymous().await
        } else {
            self.load_signed_in(&key).await
        };

        {
            let mut state = lock(&self.inner.state);
            // Loads are serialized, so only `detach` moves the epoch here.
            // A detached engine is never read again and stays `Loading`.
            if state.epoch != epoch {
                return LoadOutcome::Superseded;
            }
            if let Some(items) = loaded {
                let (cart, discarded) = Cart::from_lines(items);
                if discarded > 0 {
                    warn!(cart_key = %key, discarded, "Dropped invalid lines from stored cart");
                }
                state.cart = cart;
                if let Some(seen) = seen {
                    state.observe_remote(seen);
                }
            }
            state.phase = CartPhase::Ready;
            state.loaded = true;
            self.inner.publish(&state);
            info!(
                cart_key = %key,
                outcome = ?outcome,
                lines = state.cart.lines().len(),
                "Cart loaded"
            );
        }

        if live_sync && !key.is_anonymous() {
            self.start_live_sync(&key, epoch).await;
        }

        outcome
    }

    async fn load_anonymous(&self) -> Loaded {
        match self.read_local().await {
            Some(items) if items.is_empty() => (LoadOutcome::Empty, Some(items), None),
            Some(items) => (LoadOutcome::Local, Some(items), None),
            None => (LoadOutcome::Failed, None, None),
        }
    }

    async fn load_signed_in(&self, key: &CartKey) -> Loaded {
        match self.inner.remote.read(key).await {
            Ok(Some(document)) => {
                return (
                    LoadOutcome::Remote,
                    Some(document.items),
                    Some(document.updated_at),
                );
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, cart_key = %key, "Failed to read remote cart");
                self.inner.notify(CartNotice::LoadFailed {
                    message: e.to_string(),
                });
                return (LoadOutcome::Failed, None, None);
            }
        }

        let Some(local_items) = self.read_local().await else {
            return (LoadOutcome::Failed, None, None);
        };
        if local_items.is_empty() {
            return (LoadOutcome::Empty, Some(local_items), None);
        }

        let lines = local_items.len();
        let stamped = match self.inner.remote.write(key, &local_items).await {
            Ok(stamped) => stamped,
            Err(e) => {
                error!(error = %e, cart_key = %key, lines, "Cart migration write failed, keeping local cart");
                self.inner.notify(CartNotice::SaveFailed {
                    message: e.to_string(),
                });
                return (LoadOutcome::MigrationFailed { lines }, Some(local_items), None);
            }
        };

        // The remote copy is authoritative now; a leftover slot is only
        // ignored on the next signed-in load.
        if let Err(e) = self.inner.local.clear().await {
            warn!(error = %e, cart_key = %key, "Failed to clear local cart after migration");
        }
        info!(cart_key = %key, lines, "Migrated local cart to remote");
        (LoadOutcome::Migrated { lines }, Some(local_items), Some(stamped))
    }

    /// Read the local slot, treating corruption as empty. `None` when the
    /// slot could not be read at all.
    async fn read_local(&self) -> Option<Vec<CartLineItem>> {
        match self.inner.local.load().await {
            Ok(LocalSlot::Corrupt { reason }) => {
                warn!(reason = %reason, "Local cart is corrupt, treating as empty");
                Some(Vec::new())
            }
            Ok(slot) => Some(slot.into_items()),
            Err(e) => {
                error!(error = %e, "Failed to read local cart");
                self.inner.notify(CartNotice::LoadFailed {
                    message: e.to_string(),
                });
                None
            }
        }
    }

    async fn start_live_sync(&self, key: &CartKey, epoch: u64) {
        let subscription = match self.inner.remote.subscribe(key).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, cart_key = %key, "Live cart sync unavailable");
                return;
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let mut state = lock(&self.inner.state);
        if state.epoch != epoch {
            return;
        }
        state.listener = Some(tokio::spawn(follow_remote(weak, subscription, epoch)));
    }

    /// Reload only when `user` differs from the current identity or no load
    /// has completed yet.
    ///
    /// The check runs under the load lock, so concurrent callers with the
    /// same identity load once and the rest return `None`.
    pub async fn set_identity(&self, user: Option<UserId>) -> Option<LoadOutcome> {
        let _serialized = self.inner.load_lock.lock().await;
        {
            let state = lock(&self.inner.state);
            if state.loaded && state.identity == user {
                return None;
            }
        }
        Some(self.load_locked(user, true).await)
    }

    /// Follow an identity feed: load the current identity, then reload on
    /// every change until the sender is dropped or the engine is gone.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_identity_listener(&self, mut identity: watch::Receiver<Option<UserId>>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let user = (*identity.borrow_and_update()).clone();
                {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    Self { inner }.set_identity(user).await;
                }
                if identity.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    /// Stop live sync. No push received afterwards touches the cart.
    pub fn detach(&self) {
        let mut state = lock(&self.inner.state);
        state.epoch += 1;
        state.stop_listener();
        debug!(cart_key = %state.key, "Cart engine detached");
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of `product`, bounded by `product.stock`.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InsufficientStock`] (cart unchanged) when the
    /// resulting quantity would exceed stock, or
    /// [`CartError::InvalidQuantity`] for a zero quantity.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn add_item(&self, product: &ProductSnapshot, quantity: u32) -> Result<AddOutcome, CartError> {
        let mut state = lock(&self.inner.state);
        let outcome = match state.cart.add(product, quantity) {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(state);
                self.report_rejection(&product.id, e);
                return Err(e);
            }
        };

        let quantity = state
            .cart
            .get(&product.id)
            .map_or(quantity, |line| line.quantity);
        self.commit(&mut state);
        drop(state);

        self.inner.notify(CartNotice::ItemAdded {
            product_id: product.id.clone(),
            name: product.name.clone(),
            quantity,
        });
        Ok(outcome)
    }

    /// Add a single unit of `product`.
    ///
    /// # Errors
    ///
    /// See [`add_item`](Self::add_item).
    pub fn add_one(&self, product: &ProductSnapshot) -> Result<AddOutcome, CartError> {
        self.add_item(product, 1)
    }

    /// Drop the line for `id`. Absent lines are not an error.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn remove_item(&self, id: &ProductId) -> RemoveOutcome {
        let mut state = lock(&self.inner.state);
        let outcome = state.cart.remove(id);
        self.commit(&mut state);
        drop(state);

        if outcome == RemoveOutcome::Removed {
            self.inner.notify(CartNotice::ItemRemoved {
                product_id: id.clone(),
            });
        }
        outcome
    }

    /// Set the quantity of the line for `id`; zero removes it. Absent lines
    /// are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InsufficientStock`] (cart unchanged) when
    /// `quantity` exceeds the line's recorded stock.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn update_quantity(&self, id: &ProductId, quantity: u32) -> Result<UpdateOutcome, CartError> {
        let mut state = lock(&self.inner.state);
        let outcome = match state.cart.set_quantity(id, quantity) {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(state);
                self.report_rejection(id, e);
                return Err(e);
            }
        };

        if outcome == UpdateOutcome::Absent {
            return Ok(outcome);
        }
        self.commit(&mut state);
        drop(state);

        if outcome == UpdateOutcome::Removed {
            self.inner.notify(CartNotice::ItemRemoved {
                product_id: id.clone(),
            });
        }
        Ok(outcome)
    }

    /// Empty the cart now and delete its stored copy in the background.
    ///
    /// Deletion failures are logged only; the visible cart stays empty.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn clear_cart(&self) {
        let (key, epoch) = {
            let mut state = lock(&self.inner.state);
            state.cart.clear();
            self.inner.publish(&state);
            let epoch = (!state.key.is_anonymous()).then(|| state.begin_write());
            (state.key.clone(), epoch)
        };

        let inner = Arc::clone(&self.inner);
        self.track(tokio::spawn(async move {
            let result = if key.is_anonymous() {
                inner.local.clear().await
            } else {
                inner.remote.delete(&key).await
            };
            match result {
                Ok(()) => debug!(cart_key = %key, "Stored cart removed"),
                Err(e) => error!(error = %e, cart_key = %key, "Failed to remove stored cart"),
            }
            if let Some(epoch) = epoch {
                inner.finish_write(epoch, None);
            }
        }));
    }

    fn report_rejection(&self, id: &ProductId, error: CartError) {
        if let CartError::InsufficientStock { available } = error {
            debug!(product_id = %id, available, "Rejected cart change: insufficient stock");
            self.inner.notify(CartNotice::InsufficientStock {
                product_id: id.clone(),
                available,
            });
        }
    }

    /// Publish the new state and persist it in the background.
    fn commit(&self, state: &mut EngineState) {
        self.inner.publish(state);

        let key = state.key.clone();
        let items = state.cart.lines().to_vec();
        let epoch = (!key.is_anonymous()).then(|| state.begin_write());
        let inner = Arc::clone(&self.inner);
        self.track(tokio::spawn(async move {
            let stamped = match persist(&inner, &key, &items).await {
                Ok(stamped) => stamped,
                Err(e) => {
                    error!(error = %e, cart_key = %key, "Failed to save cart");
                    inner.notify(CartNotice::SaveFailed {
                        message: e.to_string(),
                    });
                    None
                }
            };
            if let Some(epoch) = epoch {
                inner.finish_write(epoch, stamped);
            }
        }));
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut pending = lock(&self.inner.pending);
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    /// Wait for every persistence task spawned so far.
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *lock(&self.inner.pending));
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Cart persistence task failed");
                }
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        lock(&self.inner.state).snapshot()
    }

    #[must_use]
    pub fn items(&self) -> Vec<CartLineItem> {
        lock(&self.inner.state).cart.lines().to_vec()
    }

    #[must_use]
    pub fn total_items(&self) -> u32 {
        lock(&self.inner.state).cart.total_items()
    }

    #[must_use]
    pub fn total_price(&self) -> Decimal {
        lock(&self.inner.state).cart.total_price()
    }

    #[must_use]
    pub fn phase(&self) -> CartPhase {
        lock(&self.inner.state).phase
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase() == CartPhase::Loading
    }

    #[must_use]
    pub fn cart_key(&self) -> CartKey {
        lock(&self.inner.state).key.clone()
    }

    #[must_use]
    pub fn identity(&self) -> Option<UserId> {
        lock(&self.inner.state).identity.clone()
    }

    /// Receiver that sees a new [`CartSnapshot`] after every change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Receiver for user-facing notices emitted from now on.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<CartNotice> {
        self.inner.notices.subscribe()
    }

    /// An inbox collecting failure notices emitted from now on.
    #[must_use]
    pub fn inbox(&self) -> NoticeInbox {
        NoticeInbox::new(self.notices())
    }
}

/// Save `items` under `key`. Remote writes return the store's stamp.
async fn persist<L: LocalCartStore, R: RemoteCartStore>(
    inner: &EngineInner<L, R>,
    key: &CartKey,
    items: &[CartLineItem],
) -> Result<Option<DateTime<Utc>>, StoreError> {
    if key.is_anonymous() {
        inner.local.save(items).await?;
        Ok(None)
    } else {
        inner.remote.write(key, items).await.map(Some)
    }
}

async fn follow_remote<L, R>(engine: Weak<EngineInner<L, R>>, mut subscription: RemoteSubscription, epoch: u64) {
    while let Some(document) = subscription.next().await {
        let Some(inner) = engine.upgrade() else {
            return;
        };
        if !inner.apply_remote(epoch, document) {
            return;
        }
    }
    debug!(cart_key = %subscription.key(), "Remote cart feed ended");
}
