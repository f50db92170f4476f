//! Core types for Tienda.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod email;
pub mod id;
pub mod order;
pub mod price;
pub mod product;

pub use cart::{
    ANONYMOUS_CART_KEY, AddOutcome, Cart, CartError, CartKey, CartLineItem, RemoveOutcome,
    UpdateOutcome,
};
pub use email::{Email, EmailError};
pub use id::*;
pub use order::{
    CheckoutDetails, OrderDraft, OrderLine, OrderStatus, PaymentMethod, ShippingAddress,
};
pub use price::{CurrencyCode, Price};
pub use product::ProductSnapshot;
