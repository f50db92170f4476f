//! In-process cart stores.
//!
//! Both types are cheap handles over shared state: clone one, hand the clone
//! to an engine, and keep the original to inspect or poke the store from a
//! test (or from "another tab").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use tienda_core::{CartKey, CartLineItem};

use super::{
    CartDocument, LocalCartRecord, LocalCartStore, LocalSlot, RemoteCartStore, RemoteSubscription,
    StoreError, decode_local_slot, encode_local_slot,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Now, or just after `previous` when the clock has not moved past it.
fn next_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous + chrono::Duration::microseconds(1))
}

// =============================================================================
// MemoryCartSlot
// =============================================================================

/// A local slot held in memory as a raw payload string.
#[derive(Debug, Clone, Default)]
pub struct MemoryCartSlot {
    inner: Arc<MemorySlotInner>,
}

#[derive(Debug, Default)]
struct MemorySlotInner {
    payload: Mutex<Option<String>>,
    failing: AtomicBool,
}

impl MemoryCartSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot pre-filled with a raw payload (which need not be valid).
    #[must_use]
    pub fn with_payload(payload: impl Into<String>) -> Self {
        let slot = Self::new();
        *lock(&slot.inner.payload) = Some(payload.into());
        slot
    }

    /// A slot pre-filled with `items`.
    #[must_use]
    pub fn with_items(items: &[CartLineItem]) -> Self {
        let payload = serde_json::to_string(&LocalCartRecord::new(items)).unwrap_or_default();
        Self::with_payload(payload)
    }

    /// The raw payload currently stored.
    #[must_use]
    pub fn payload(&self) -> Option<String> {
        lock(&self.inner.payload).clone()
    }

    /// Decode what is currently stored.
    #[must_use]
    pub fn slot(&self) -> LocalSlot {
        decode_local_slot(lock(&self.inner.payload).as_deref())
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("local slot offline".to_owned()));
        }
        Ok(())
    }
}

impl LocalCartStore for MemoryCartSlot {
    async fn load(&self) -> Result<LocalSlot, StoreError> {
        self.check()?;
        Ok(self.slot())
    }

    async fn save(&self, items: &[CartLineItem]) -> Result<(), StoreError> {
        self.check()?;
        let payload = encode_local_slot(items)?;
        *lock(&self.inner.payload) = Some(payload);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        *lock(&self.inner.payload) = None;
        Ok(())
    }
}

// =============================================================================
// MemoryCartStore
// =============================================================================

/// A remote store whose documents live in per-key watch channels.
///
/// Writing a document notifies every subscriber of that key, so two engines
/// sharing one store behave like two tabs on the same account.
#[derive(Debug, Clone, Default)]
pub struct MemoryCartStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    documents: Mutex<HashMap<CartKey, watch::Sender<Option<CartDocument>>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current document for `key`, read synchronously.
    #[must_use]
    pub fn document(&self, key: &CartKey) -> Option<CartDocument> {
        lock(&self.inner.documents)
            .get(key)
            .and_then(|sender| (*sender.borrow()).clone())
    }

    /// Store a document as-is, notifying subscribers.
    pub fn put_document(&self, key: &CartKey, document: CartDocument) {
        let mut documents = lock(&self.inner.documents);
        documents
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(document));
    }

    /// Number of successful `write` calls so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Make reads and subscriptions fail.
    pub fn set_fail_reads(&self, failing: bool) {
        self.inner.fail_reads.store(failing, Ordering::SeqCst);
    }

    /// Make writes, deletes and creates fail.
    pub fn set_fail_writes(&self, failing: bool) {
        self.inner.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote reads offline".to_owned()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("remote writes offline".to_owned()));
        }
        Ok(())
    }
}

impl RemoteCartStore for MemoryCartStore {
    async fn read(&self, key: &CartKey) -> Result<Option<CartDocument>, StoreError> {
        self.check_reads()?;
        Ok(self.document(key))
    }

    async fn write(&self, key: &CartKey, items: &[CartLineItem]) -> Result<DateTime<Utc>, StoreError> {
        self.check_writes()?;
        let mut documents = lock(&self.inner.documents);
        let sender = documents
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0);

        let document = match (*sender.borrow()).clone() {
            Some(mut existing) => {
                existing.items = items.to_vec();
                existing.updated_at = next_stamp(existing.updated_at);
                existing
            }
            None => CartDocument::new(key, items.to_vec()),
        };
        let stamped = document.updated_at;
        sender.send_replace(Some(document));
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stamped)
    }

    async fn delete(&self, key: &CartKey) -> Result<(), StoreError> {
        self.check_writes()?;
        if let Some(sender) = lock(&self.inner.documents).get(key) {
            sender.send_replace(None);
        }
        Ok(())
    }

    async fn subscribe(&self, key: &CartKey) -> Result<RemoteSubscription, StoreError> {
        self.check_reads()?;
        let mut receiver = lock(&self.inner.documents)
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();

        Ok(RemoteSubscription::spawn(key.clone(), |sender| async move {
            let current = (*receiver.borrow_and_update()).clone();
            if let Some(document) = current
                && sender.send(document).await.is_err()
            {
                return;
            }

            while receiver.changed().await.is_ok() {
                let latest = (*receiver.borrow_and_update()).clone();
                if let Some(document) = latest
                    && sender.send(document).await.is_err()
                {
                    return;
                }
            }
        }))
    }

    async fn create_if_absent(&self, key: &CartKey) -> Result<bool, StoreError> {
        self.check_writes()?;
        let mut documents = lock(&self.inner.documents);
        let sender = documents
            .entry(key.clone())
            .or_insert_with(|| watch::channel(None).0);

        if sender.borrow().is_some() {
            return Ok(false);
        }
        sender.send_replace(Some(CartDocument::new(key, Vec::new())));
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use tienda_core::{ProductSnapshot, UserId};

    use super::*;

    fn line(id: &str, quantity: u32) -> CartLineItem {
        CartLineItem::new(ProductSnapshot::new(id, id, Decimal::new(250, 2), 10), quantity)
    }

    fn key() -> CartKey {
        CartKey::resolve(Some(&UserId::new("u1")))
    }

    #[tokio::test]
    async fn test_slot_save_load_clear() {
        let slot = MemoryCartSlot::new();
        assert_eq!(slot.load().await.unwrap(), LocalSlot::Absent);

        slot.save(&[line("a", 1)]).await.unwrap();
        assert_eq!(slot.load().await.unwrap(), LocalSlot::Present(vec![line("a", 1)]));

        slot.clear().await.unwrap();
        assert_eq!(slot.payload(), None);
    }

    #[tokio::test]
    async fn test_slot_failure_injection() {
        let slot = MemoryCartSlot::with_items(&[line("a", 1)]);
        slot.set_failing(true);
        assert!(matches!(slot.load().await, Err(StoreError::Unavailable(_))));
        assert!(slot.payload().is_some());
    }

    #[tokio::test]
    async fn test_write_is_upsert_and_idempotent() {
        let store = MemoryCartStore::new();
        store.write(&key(), &[line("a", 1)]).await.unwrap();
        let first = store.read(&key()).await.unwrap().unwrap();

        store.write(&key(), &[line("a", 1)]).await.unwrap();
        let second = store.read(&key()).await.unwrap().unwrap();

        assert_eq!(first.items, second.items);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.user_id, Some(UserId::new("u1")));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_write_stamps_strictly_increase() {
        let store = MemoryCartStore::new();
        let ahead = Utc::now() + chrono::Duration::minutes(5);
        let mut document = CartDocument::new(&key(), vec![line("a", 1)]);
        document.updated_at = ahead;
        store.put_document(&key(), document);

        let first = store.write(&key(), &[line("a", 2)]).await.unwrap();
        let second = store.write(&key(), &[line("a", 3)]).await.unwrap();

        assert!(first > ahead);
        assert!(second > first);
        assert_eq!(store.document(&key()).unwrap().updated_at, second);
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let store = MemoryCartStore::new();
        store.delete(&key()).await.unwrap();

        store.write(&key(), &[line("a", 1)]).await.unwrap();
        store.delete(&key()).await.unwrap();
        assert!(store.read(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_follows() {
        let store = MemoryCartStore::new();
        store.write(&key(), &[line("a", 1)]).await.unwrap();

        let mut subscription = store.subscribe(&key()).await.unwrap();
        let replay = subscription.next().await.unwrap();
        assert_eq!(replay.items, vec![line("a", 1)]);

        store.write(&key(), &[line("a", 3)]).await.unwrap();
        let pushed = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed.items, vec![line("a", 3)]);
    }

    #[tokio::test]
    async fn test_create_if_absent_never_overwrites() {
        let store = MemoryCartStore::new();
        assert!(store.create_if_absent(&key()).await.unwrap());
        assert!(!store.create_if_absent(&key()).await.unwrap());

        store.write(&key(), &[line("a", 2)]).await.unwrap();
        assert!(!store.create_if_absent(&key()).await.unwrap());
        assert_eq!(store.document(&key()).unwrap().items, vec![line("a", 2)]);
    }
}
