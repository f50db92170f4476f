//! Checkout from a reconciled cart.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use rust_decimal::Decimal;
use tienda_core::{
    CartKey, CartLineItem, CheckoutDetails, Email, OrderStatus, PaymentMethod, ShippingAddress,
    UserId,
};
use tienda_integration_tests::{product, session};
use tienda_storefront::checkout::{CheckoutError, MemoryOrderSink, place_order};
use tienda_storefront::store::{LocalSlot, MemoryCartSlot, MemoryCartStore};

fn details(method: PaymentMethod) -> CheckoutDetails {
    CheckoutDetails {
        customer_name: "Luis Quispe".to_owned(),
        customer_email: Email::parse("luis@tienda.pe").unwrap(),
        phone: "987654321".to_owned(),
        shipping_address: ShippingAddress {
            street: "Av. Arequipa 1200".to_owned(),
            city: "Lima".to_owned(),
            state: "Lima".to_owned(),
            zip_code: "15046".to_owned(),
            country: "PE".to_owned(),
        },
        payment_method: method,
    }
}

#[tokio::test]
async fn test_guest_checkout_clears_local_slot() {
    let slot = MemoryCartSlot::new();
    let engine = session(&slot, &MemoryCartStore::new());
    engine.load(None).await;
    engine.add_item(&product("a", 1500, 5), 2).unwrap();
    engine.add_item(&product("b", 990, 3), 1).unwrap();
    engine.settle().await;
    assert!(matches!(slot.slot(), LocalSlot::Present(items) if items.len() == 2));

    let sink = MemoryOrderSink::new();
    let id = place_order(&engine, &sink, details(PaymentMethod::Yape))
        .await
        .unwrap();
    engine.settle().await;

    let order = sink.get(&id).unwrap();
    assert_eq!(order.total, Decimal::new(3990, 2));
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_method, PaymentMethod::Yape);
    assert!(order.user_id.is_none());
    assert!(engine.items().is_empty());
    assert_eq!(slot.slot(), LocalSlot::Absent);
}

#[tokio::test]
async fn test_migrated_cart_checks_out_under_user() {
    let slot = MemoryCartSlot::with_items(&[CartLineItem::new(product("a", 1500, 5), 3)]);
    let remote = MemoryCartStore::new();
    let engine = session(&slot, &remote);
    let user = UserId::new("u-7");
    engine.load(Some(user.clone())).await;
    engine.settle().await;

    let sink = MemoryOrderSink::new();
    let id = place_order(&engine, &sink, details(PaymentMethod::Card))
        .await
        .unwrap();
    engine.settle().await;

    let order = sink.get(&id).unwrap();
    assert_eq!(order.user_id, Some(user.clone()));
    assert_eq!(order.items[0].quantity, 3);
    assert!(remote.document(&CartKey::resolve(Some(&user))).is_none());
}

#[tokio::test]
async fn test_second_checkout_of_same_cart_is_rejected() {
    let engine = session(&MemoryCartSlot::new(), &MemoryCartStore::new());
    engine.load(None).await;
    engine.add_one(&product("a", 1500, 5)).unwrap();

    let sink = MemoryOrderSink::new();
    place_order(&engine, &sink, details(PaymentMethod::Transfer))
        .await
        .unwrap();
    let again = place_order(&engine, &sink, details(PaymentMethod::Transfer)).await;

    assert!(matches!(again, Err(CheckoutError::EmptyCart)));
    assert_eq!(sink.len(), 1);
}
