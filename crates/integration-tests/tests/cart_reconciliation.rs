//! Cart reconciliation across sessions.
//!
//! Each engine plays one app session (a browser tab or a native client)
//! with its own local slot. Sessions of the same user share one remote
//! store, so a write from one is pushed to the others.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use tienda_core::{CartError, CartKey, CartLineItem, ProductId, UpdateOutcome, UserId};
use tienda_integration_tests::{eventually, product, session};
use tienda_storefront::cart::{CartNotice, LoadOutcome};
use tienda_storefront::store::{
    CartDocument, FileCartSlot, LocalCartStore, LocalSlot, MemoryCartSlot, MemoryCartStore,
    RemoteCartStore,
};

fn user() -> UserId {
    UserId::new("u-1")
}

fn key() -> CartKey {
    CartKey::resolve(Some(&user()))
}

// ============================================================================
// Sign-in
// ============================================================================

#[tokio::test]
async fn test_sign_in_migrates_local_cart() {
    let slot = MemoryCartSlot::with_items(&[CartLineItem::new(product("a", 1000, 5), 2)]);
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);

    let outcome = engine.load(Some(user())).await;
    engine.settle().await;

    assert_eq!(outcome, LoadOutcome::Migrated { lines: 1 });
    let document = remote.document(&key()).unwrap();
    assert_eq!(document.items, vec![CartLineItem::new(product("a", 1000, 5), 2)]);
    assert_eq!(document.user_id, Some(user()));
    assert_eq!(slot.slot(), LocalSlot::Absent);
    assert_eq!(engine.total_items(), 2);
}

#[tokio::test]
async fn test_remote_cart_wins_and_local_slot_is_kept() {
    let slot = MemoryCartSlot::with_items(&[CartLineItem::new(product("a", 1000, 5), 1)]);
    let before = slot.payload();
    let remote = MemoryCartStore::new();
    remote.put_document(
        &key(),
        CartDocument::new(&key(), vec![CartLineItem::new(product("b", 500, 9), 3)]),
    );
    let engine = session(&slot, &remote);

    assert_eq!(engine.load(Some(user())).await, LoadOutcome::Remote);
    engine.settle().await;

    assert_eq!(engine.items(), vec![CartLineItem::new(product("b", 500, 9), 3)]);
    assert_eq!(slot.payload(), before);
    assert_eq!(remote.write_count(), 0);
}

#[tokio::test]
async fn test_failed_migration_keeps_local_slot() {
    let slot = MemoryCartSlot::with_items(&[CartLineItem::new(product("a", 1000, 5), 2)]);
    let remote = MemoryCartStore::new();
    remote.set_fail_writes(true);
    let engine = session(&slot, &remote);
    let mut notices = engine.notices();

    let outcome = engine.load(Some(user())).await;

    assert_eq!(outcome, LoadOutcome::MigrationFailed { lines: 1 });
    assert_eq!(engine.total_items(), 2);
    assert!(matches!(slot.slot(), LocalSlot::Present(items) if items.len() == 1));
    assert!(matches!(notices.try_recv(), Ok(CartNotice::SaveFailed { .. })));

    // The next sign-in tries again.
    remote.set_fail_writes(false);
    engine.detach();
    assert_eq!(
        engine.load(Some(user())).await,
        LoadOutcome::Migrated { lines: 1 }
    );
    assert_eq!(slot.slot(), LocalSlot::Absent);
}

#[tokio::test]
async fn test_empty_everywhere_creates_nothing() {
    let slot = MemoryCartSlot::new();
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);

    assert_eq!(engine.load(Some(user())).await, LoadOutcome::Empty);
    assert!(remote.document(&key()).is_none());
    assert!(!engine.is_loading());
}

#[tokio::test]
async fn test_file_slot_is_migrated_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cart.json");
    let file_slot = FileCartSlot::new(&path);
    file_slot
        .save(&[CartLineItem::new(product("a", 1000, 5), 4)])
        .await
        .unwrap();

    let remote = MemoryCartStore::new();
    let engine = tienda_storefront::cart::CartEngine::new(file_slot, remote.clone());

    assert_eq!(
        engine.load(Some(user())).await,
        LoadOutcome::Migrated { lines: 1 }
    );
    assert!(!path.exists());
    assert_eq!(remote.document(&key()).unwrap().items[0].quantity, 4);
}

// ============================================================================
// Signed-in mutations
// ============================================================================

#[tokio::test]
async fn test_mutations_write_remote_document() {
    let slot = MemoryCartSlot::new();
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);
    engine.load(Some(user())).await;

    engine.add_item(&product("a", 1000, 5), 2).unwrap();
    engine.add_one(&product("b", 250, 1)).unwrap();
    engine.settle().await;

    let document = remote.document(&key()).unwrap();
    assert_eq!(document.items.len(), 2);
    assert_eq!(slot.slot(), LocalSlot::Absent);
}

#[tokio::test]
async fn test_update_to_zero_removes_line() {
    let slot = MemoryCartSlot::new();
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);
    engine.load(Some(user())).await;
    engine.add_item(&product("a", 1000, 5), 2).unwrap();

    let outcome = engine.update_quantity(&ProductId::new("a"), 0).unwrap();
    engine.settle().await;

    assert_eq!(outcome, UpdateOutcome::Removed);
    assert!(engine.items().is_empty());
    assert!(remote.document(&key()).unwrap().items.is_empty());
}

#[tokio::test]
async fn test_insufficient_stock_leaves_remote_untouched() {
    let slot = MemoryCartSlot::new();
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);
    engine.load(Some(user())).await;
    engine.add_item(&product("a", 1000, 5), 4).unwrap();
    engine.settle().await;
    let writes = remote.write_count();

    let result = engine.add_item(&product("a", 1000, 5), 2);
    engine.settle().await;

    assert_eq!(result, Err(CartError::InsufficientStock { available: 5 }));
    assert_eq!(engine.total_items(), 4);
    assert_eq!(remote.write_count(), writes);
}

#[tokio::test]
async fn test_clear_cart_deletes_remote_document() {
    let slot = MemoryCartSlot::new();
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);
    engine.load(Some(user())).await;
    engine.add_item(&product("a", 1000, 5), 1).unwrap();
    engine.settle().await;
    assert!(remote.document(&key()).is_some());

    engine.clear_cart();
    engine.settle().await;

    assert!(engine.items().is_empty());
    assert!(remote.document(&key()).is_none());
}

// ============================================================================
// Live sync
// ============================================================================

#[tokio::test]
async fn test_change_in_one_session_reaches_the_other() {
    let remote = MemoryCartStore::new();
    let phone = session(&MemoryCartSlot::new(), &remote);
    let laptop = session(&MemoryCartSlot::new(), &remote);
    phone.load(Some(user())).await;
    laptop.load(Some(user())).await;

    phone.add_item(&product("a", 1000, 5), 3).unwrap();
    phone.settle().await;

    eventually(|| laptop.total_items() == 3).await;
    assert_eq!(laptop.items(), phone.items());
}

#[tokio::test]
async fn test_other_user_changes_are_not_seen() {
    let remote = MemoryCartStore::new();
    let mine = session(&MemoryCartSlot::new(), &remote);
    let theirs = session(&MemoryCartSlot::new(), &remote);
    mine.load(Some(user())).await;
    theirs.load(Some(UserId::new("u-2"))).await;

    theirs.add_item(&product("a", 1000, 5), 1).unwrap();
    theirs.settle().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(mine.items().is_empty());
}

#[tokio::test]
async fn test_detached_session_ignores_later_changes() {
    let remote = MemoryCartStore::new();
    let active = session(&MemoryCartSlot::new(), &remote);
    let closed = session(&MemoryCartSlot::new(), &remote);
    active.load(Some(user())).await;
    closed.load(Some(user())).await;

    closed.detach();
    active.add_item(&product("a", 1000, 5), 2).unwrap();
    active.settle().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(closed.items().is_empty());
}

#[tokio::test]
async fn test_external_write_is_applied_without_echo() {
    let remote = MemoryCartStore::new();
    let engine = session(&MemoryCartSlot::new(), &remote);
    engine.load(Some(user())).await;

    remote
        .write(&key(), &[CartLineItem::new(product("z", 100, 9), 6)])
        .await
        .unwrap();

    eventually(|| engine.total_items() == 6).await;
    engine.settle().await;
    assert_eq!(remote.write_count(), 1);
}

// ============================================================================
// Sign-out
// ============================================================================

#[tokio::test]
async fn test_logout_returns_to_local_cart() {
    let slot = MemoryCartSlot::with_items(&[CartLineItem::new(product("a", 1000, 5), 2)]);
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);
    engine.load(Some(user())).await;
    engine.settle().await;

    // The slot was migrated, so the anonymous cart starts empty.
    assert_eq!(engine.load(None).await, LoadOutcome::Empty);
    assert!(engine.cart_key().is_anonymous());
    assert!(engine.items().is_empty());

    engine.add_item(&product("c", 300, 2), 1).unwrap();
    engine.settle().await;

    assert!(matches!(slot.slot(), LocalSlot::Present(items) if items.len() == 1));
    assert_eq!(remote.document(&key()).unwrap().items.len(), 1);
    assert_eq!(remote.document(&key()).unwrap().items[0].product.id, ProductId::new("a"));
}

#[tokio::test]
async fn test_remote_changes_after_logout_are_ignored() {
    let remote = MemoryCartStore::new();
    let engine = session(&MemoryCartSlot::new(), &remote);
    engine.load(Some(user())).await;
    engine.load(None).await;

    remote
        .write(&key(), &[CartLineItem::new(product("z", 100, 9), 6)])
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(engine.items().is_empty());
}

#[tokio::test]
async fn test_identity_feed_drives_reloads() {
    let slot = MemoryCartSlot::new();
    let remote = MemoryCartStore::new();
    remote.put_document(
        &key(),
        CartDocument::new(&key(), vec![CartLineItem::new(product("b", 500, 9), 3)]),
    );
    let engine = session(&slot, &remote);
    let (identity, feed) = tokio::sync::watch::channel(None);
    let listener = engine.spawn_identity_listener(feed);

    eventually(|| !engine.is_loading()).await;
    assert!(engine.items().is_empty());

    identity.send_replace(Some(user()));
    eventually(|| engine.total_items() == 3).await;

    identity.send_replace(None);
    eventually(|| engine.cart_key().is_anonymous() && engine.items().is_empty()).await;

    drop(identity);
    listener.await.unwrap();
}

#[tokio::test]
async fn test_snapshot_serializes_for_clients() {
    let engine = session(&MemoryCartSlot::new(), &MemoryCartStore::new());
    engine.load(Some(user())).await;
    engine.add_item(&product("a", 1000, 5), 2).unwrap();

    let json = serde_json::to_value(engine.snapshot()).unwrap();
    assert_eq!(json["cartKey"], "cart_u-1");
    assert_eq!(json["phase"], "ready");
    assert_eq!(json["totalItems"], 2);
}
