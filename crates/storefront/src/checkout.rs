//! Order placement.
//!
//! Payment is simulated: an order is recorded with the chosen method and
//! the cart is emptied. The order is stored before the cart is cleared, so
//! a failed insert leaves the shopper's cart intact for a retry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{info, instrument};

use tienda_core::{Cart, CheckoutDetails, OrderDraft, OrderId};

use crate::cart::CartEngine;
use crate::db::RepositoryError;
use crate::store::{LocalCartStore, RemoteCartStore};

/// Checkout failed.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// There is nothing to order.
    #[error("cart is empty")]
    EmptyCart,

    /// The order could not be stored.
    #[error("failed to store order: {0}")]
    Sink(#[from] RepositoryError),
}

/// Destination for placed orders.
pub trait OrderSink: Send + Sync {
    /// Store `order` and return its id.
    fn place(&self, order: &OrderDraft) -> impl Future<Output = Result<OrderId, RepositoryError>> + Send;
}

/// Place an order for the engine's current cart and identity, then clear
/// the cart.
///
/// # Errors
///
/// Returns [`CheckoutError::EmptyCart`] when there are no items, or
/// [`CheckoutError::Sink`] when the order could not be stored (the cart is
/// left as it was).
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
#[instrument(skip_all, fields(cart_key = %engine.cart_key()))]
pub async fn place_order<L, R, S>(
    engine: &CartEngine<L, R>,
    sink: &S,
    details: CheckoutDetails,
) -> Result<OrderId, CheckoutError>
where
    L: LocalCartStore,
    R: RemoteCartStore,
    S: OrderSink,
{
    let (cart, _) = Cart::from_lines(engine.items());
    if cart.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let draft = OrderDraft::from_cart(&cart, details, engine.identity());
    let order_id = sink.place(&draft).await?;

    engine.clear_cart();
    info!(order_id = %order_id, total = %draft.total, lines = draft.items.len(), "Order placed");
    Ok(order_id)
}

/// Order sink that keeps orders in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryOrderSink {
    orders: Arc<Mutex<HashMap<OrderId, OrderDraft>>>,
}

impl MemoryOrderSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &OrderId) -> Option<OrderDraft> {
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderSink for MemoryOrderSink {
    async fn place(&self, order: &OrderDraft) -> Result<OrderId, RepositoryError> {
        let id = OrderId::new(uuid::Uuid::new_v4().to_string());
        self.orders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), order.clone());
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use tienda_core::{Email, PaymentMethod, ProductSnapshot, ShippingAddress, UserId};

    use super::*;
    use crate::store::{MemoryCartSlot, MemoryCartStore};

    struct FailingSink;

    impl OrderSink for FailingSink {
        async fn place(&self, _order: &OrderDraft) -> Result<OrderId, RepositoryError> {
            Err(RepositoryError::DataCorruption("orders table offline".to_owned()))
        }
    }

    fn details() -> CheckoutDetails {
        CheckoutDetails {
            customer_name: "Ana Torres".to_owned(),
            customer_email: Email::parse("ana@tienda.pe").unwrap(),
            phone: "999888777".to_owned(),
            shipping_address: ShippingAddress {
                street: "Jr. Union 450".to_owned(),
                city: "Lima".to_owned(),
                state: "Lima".to_owned(),
                zip_code: "15001".to_owned(),
                country: "PE".to_owned(),
            },
            payment_method: PaymentMethod::Card,
        }
    }

    async fn signed_in_engine() -> (CartEngine<MemoryCartSlot, MemoryCartStore>, MemoryCartStore) {
        let store = MemoryCartStore::new();
        let engine = CartEngine::new(MemoryCartSlot::new(), store.clone());
        engine.load(Some(UserId::new("u1"))).await;
        (engine, store)
    }

    #[tokio::test]
    async fn test_place_order_clears_cart_after_insert() {
        let (engine, store) = signed_in_engine().await;
        engine
            .add_item(&ProductSnapshot::new("p1", "Polo", Decimal::new(3990, 2), 5), 2)
            .unwrap();
        engine.settle().await;

        let sink = MemoryOrderSink::new();
        let id = place_order(&engine, &sink, details()).await.unwrap();
        engine.settle().await;

        let order = sink.get(&id).unwrap();
        assert_eq!(order.total, Decimal::new(7980, 2));
        assert_eq!(order.user_id, Some(UserId::new("u1")));
        assert!(engine.items().is_empty());
        assert!(store.document(&engine.cart_key()).is_none());
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let (engine, _) = signed_in_engine().await;
        let sink = MemoryOrderSink::new();

        let result = place_order(&engine, &sink, details()).await;
        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_cart() {
        let (engine, _) = signed_in_engine().await;
        engine
            .add_item(&ProductSnapshot::new("p1", "Polo", Decimal::new(3990, 2), 5), 1)
            .unwrap();

        let result = place_order(&engine, &FailingSink, details()).await;
        assert!(matches!(result, Err(CheckoutError::Sink(_))));
        assert_eq!(engine.total_items(), 1);
    }
}
