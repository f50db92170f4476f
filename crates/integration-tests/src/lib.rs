//! Integration tests for Tienda.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tienda-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart_reconciliation` - Engines over shared in-process stores: sign-in
//!   migration, live sync between sessions, logout
//! - `checkout` - Orders placed from an engine's cart
//!
//! Every test runs against the in-process stores, so no database is needed.
//! This crate holds the shared fixtures.

use std::time::Duration;

use rust_decimal::Decimal;
use tienda_core::ProductSnapshot;
use tienda_storefront::cart::CartEngine;
use tienda_storefront::store::{MemoryCartSlot, MemoryCartStore};

/// An engine wired to in-process stores.
pub type TestEngine = CartEngine<MemoryCartSlot, MemoryCartStore>;

/// A product priced at `cents / 100` soles with `stock` units available.
#[must_use]
pub fn product(id: &str, cents: i64, stock: u32) -> ProductSnapshot {
    ProductSnapshot::new(id, format!("Producto {id}"), Decimal::new(cents, 2), stock)
}

/// One session: its own local slot, sharing `remote` with other sessions.
#[must_use]
pub fn session(slot: &MemoryCartSlot, remote: &MemoryCartStore) -> TestEngine {
    CartEngine::new(slot.clone(), remote.clone())
}

/// Poll `check` until it holds, for up to about a second.
///
/// # Panics
///
/// Panics if the condition never holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
