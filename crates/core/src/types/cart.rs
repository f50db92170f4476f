//! Cart identity, line items and the stock-bounded mutation rules.
//!
//! [`Cart`] is pure state: it knows nothing about where it is persisted.
//! The storefront engine wraps it with load/merge and persistence.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::{ProductId, UserId};
use super::product::ProductSnapshot;

/// Storage key used for carts of shoppers who are not logged in.
pub const ANONYMOUS_CART_KEY: &str = "anonymous_cart";

const USER_CART_PREFIX: &str = "cart_";

// =============================================================================
// Cart Key
// =============================================================================

/// The storage key a cart lives under.
///
/// Keys are the only sharding boundary: operations under different keys
/// never interact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartKey(String);

impl CartKey {
    /// Resolve the key for the current identity.
    ///
    /// `cart_<userId>` when a user is logged in, `anonymous_cart` otherwise.
    ///
    /// ```
    /// use tienda_core::{CartKey, UserId};
    ///
    /// assert_eq!(CartKey::resolve(Some(&UserId::new("42"))).as_str(), "cart_42");
    /// assert_eq!(CartKey::resolve(None).as_str(), "anonymous_cart");
    /// ```
    #[must_use]
    pub fn resolve(user: Option<&UserId>) -> Self {
        user.map_or_else(
            || Self(ANONYMOUS_CART_KEY.to_owned()),
            |id| Self(format!("{USER_CART_PREFIX}{id}")),
        )
    }

    /// The anonymous key.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::resolve(None)
    }

    /// Whether this is the anonymous key.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_CART_KEY
    }

    /// Owner of an authenticated key.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        if self.is_anonymous() {
            return None;
        }
        self.0.strip_prefix(USER_CART_PREFIX).map(UserId::from)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CartKey> for String {
    fn from(key: CartKey) -> Self {
        key.0
    }
}

// =============================================================================
// Line Items
// =============================================================================

/// One product in the cart and how many units of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub product: ProductSnapshot,
    pub quantity: u32,
}

impl CartLineItem {
    #[must_use]
    pub const fn new(product: ProductSnapshot, quantity: u32) -> Self {
        Self { product, quantity }
    }

    /// `quantity * price`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

// =============================================================================
// Errors and Outcomes
// =============================================================================

/// A cart mutation the shopper asked for and the cart refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CartError {
    /// The requested quantity is more than the product has in stock.
    #[error("only {available} units available")]
    InsufficientStock { available: u32 },

    /// A quantity of zero cannot be added.
    #[error("quantity must be at least 1")]
    InvalidQuantity,
}

/// What [`Cart::add`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new line was created.
    Inserted,
    /// An existing line's quantity went up.
    Increased { quantity: u32 },
}

/// What [`Cart::remove`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Absent,
}

/// What [`Cart::set_quantity`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// Quantity zero dropped the line.
    Removed,
    /// No line for that product; nothing changed.
    Absent,
}

// =============================================================================
// Cart
// =============================================================================

/// The shopper's cart.
///
/// Product ids are unique across lines and every quantity is positive and
/// no larger than the stock of the snapshot it was last checked against.
/// Lines keep insertion order for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart {
    lines: Vec<CartLineItem>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Build a cart from lines read out of storage.
    ///
    /// Stored data is not trusted to uphold the cart invariants: lines with
    /// quantity zero are dropped and, when a product id repeats, the first
    /// line wins. Returns the cart and how many lines were discarded.
    #[must_use]
    pub fn from_lines(lines: Vec<CartLineItem>) -> (Self, usize) {
        let total = lines.len();
        let mut cart = Self::new();
        for line in lines {
            if line.quantity == 0 || cart.get(&line.product.id).is_some() {
                continue;
            }
            cart.lines.push(line);
        }
        let discarded = total - cart.lines.len();
        (cart, discarded)
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLineItem] {
        &self.lines
    }

    #[must_use]
    pub fn into_lines(self) -> Vec<CartLineItem> {
        self.lines
    }

    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<&CartLineItem> {
        self.lines.iter().find(|line| &line.product.id == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of all quantities.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |acc, line| acc.saturating_add(line.quantity))
    }

    /// Sum of `quantity * price` over all lines.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.lines.iter().map(CartLineItem::line_total).sum()
    }

    /// Add `quantity` units of `product`.
    ///
    /// The resulting line quantity (existing plus requested) is checked
    /// against `product.stock`. On success the line's snapshot is replaced
    /// by `product`, so the newest observed stock and price apply from here
    /// on.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`] if `quantity` is zero.
    /// - [`CartError::InsufficientStock`] if the resulting quantity exceeds
    ///   `product.stock`. The cart is unchanged.
    pub fn add(&mut self, product: &ProductSnapshot, quantity: u32) -> Result<AddOutcome, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }

        let insufficient = CartError::InsufficientStock {
            available: product.stock,
        };

        match self.lines.iter_mut().find(|line| line.product.id == product.id) {
            Some(line) => {
                let new_quantity = line.quantity.checked_add(quantity).ok_or(insufficient)?;
                if new_quantity > product.stock {
                    return Err(insufficient);
                }
                line.quantity = new_quantity;
                line.product = product.clone();
                Ok(AddOutcome::Increased {
                    quantity: new_quantity,
                })
            }
            None => {
                if quantity > product.stock {
                    return Err(insufficient);
                }
                self.lines.push(CartLineItem::new(product.clone(), quantity));
                Ok(AddOutcome::Inserted)
            }
        }
    }

    /// Drop the line for `id` if there is one.
    pub fn remove(&mut self, id: &ProductId) -> RemoveOutcome {
        let before = self.lines.len();
        self.lines.retain(|line| &line.product.id != id);
        if self.lines.len() == before {
            RemoveOutcome::Absent
        } else {
            RemoveOutcome::Removed
        }
    }

    /// Set the quantity of an existing line.
    ///
    /// The stock check uses the line's own snapshot and runs before the
    /// zero check; a quantity of zero drops the line.
    ///
    /// # Errors
    ///
    /// [`CartError::InsufficientStock`] if `quantity` exceeds the line's
    /// stock. The cart is unchanged.
    pub fn set_quantity(&mut self, id: &ProductId, quantity: u32) -> Result<UpdateOutcome, CartError> {
        let Some(line) = self.lines.iter_mut().find(|line| &line.product.id == id) else {
            return Ok(UpdateOutcome::Absent);
        };

        if quantity > line.product.stock {
            return Err(CartError::InsufficientStock {
                available: line.product.stock,
            });
        }

        if quantity == 0 {
            self.remove(id);
            return Ok(UpdateOutcome::Removed);
        }

        line.quantity = quantity;
        Ok(UpdateOutcome::Updated)
    }

    /// Remove every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn product(id: &str, cents: i64, stock: u32) -> ProductSnapshot {
        ProductSnapshot::new(id, format!("Producto {id}"), Decimal::new(cents, 2), stock)
    }

    fn assert_totals_consistent(cart: &Cart) {
        let items: u32 = cart.lines().iter().map(|l| l.quantity).sum();
        let price: Decimal = cart
            .lines()
            .iter()
            .map(|l| l.product.price * Decimal::from(l.quantity))
            .sum();
        assert_eq!(cart.total_items(), items);
        assert_eq!(cart.total_price(), price);
    }

    // =========================================================================
    // Cart Key
    // =========================================================================

    #[test]
    fn test_cart_key_resolution() {
        let user = UserId::new("u-7");
        let key = CartKey::resolve(Some(&user));
        assert_eq!(key.as_str(), "cart_u-7");
        assert_eq!(key.user_id(), Some(user));
        assert!(!key.is_anonymous());

        let anon = CartKey::resolve(None);
        assert_eq!(anon.as_str(), ANONYMOUS_CART_KEY);
        assert!(anon.is_anonymous());
        assert_eq!(anon.user_id(), None);
    }

    // =========================================================================
    // Add
    // =========================================================================

    #[test]
    fn test_add_inserts_then_increases() {
        let mut cart = Cart::new();
        let p = product("a", 1000, 5);

        assert_eq!(cart.add(&p, 2).unwrap(), AddOutcome::Inserted);
        assert_eq!(cart.add(&p, 3).unwrap(), AddOutcome::Increased { quantity: 5 });
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.total_items(), 5);
        assert_eq!(cart.total_price(), Decimal::new(5000, 2));
    }

    #[test]
    fn test_add_over_stock_is_rejected_without_change() {
        let mut cart = Cart::new();
        let p = product("a", 1000, 3);

        assert_eq!(
            cart.add(&p, 4),
            Err(CartError::InsufficientStock { available: 3 })
        );
        assert!(cart.is_empty());

        cart.add(&p, 2).unwrap();
        let before = cart.clone();
        assert_eq!(
            cart.add(&p, 2),
            Err(CartError::InsufficientStock { available: 3 })
        );
        assert_eq!(cart, before);
    }

    #[test]
    fn test_add_zero_is_invalid() {
        let mut cart = Cart::new();
        assert_eq!(cart.add(&product("a", 100, 5), 0), Err(CartError::InvalidQuantity));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_add_refreshes_snapshot() {
        let mut cart = Cart::new();
        cart.add(&product("a", 1000, 10), 1).unwrap();
        cart.add(&product("a", 1200, 2), 1).unwrap();

        let line = cart.get(&ProductId::new("a")).unwrap();
        assert_eq!(line.product.stock, 2);
        assert_eq!(line.product.price, Decimal::new(1200, 2));
        assert_eq!(cart.set_quantity(&ProductId::new("a"), 3), Err(CartError::InsufficientStock { available: 2 }));
    }

    #[test]
    fn test_add_then_remove_restores_cart() {
        let mut cart = Cart::new();
        cart.add(&product("a", 500, 9), 2).unwrap();
        let before = cart.clone();

        cart.add(&product("b", 700, 9), 4).unwrap();
        assert_eq!(cart.remove(&ProductId::new("b")), RemoveOutcome::Removed);
        assert_eq!(cart, before);
    }

    // =========================================================================
    // Remove / Update
    // =========================================================================

    #[test]
    fn test_remove_absent_is_noop() {
        let mut cart = Cart::new();
        assert_eq!(cart.remove(&ProductId::new("zzz")), RemoveOutcome::Absent);
    }

    #[test]
    fn test_set_quantity_zero_equals_remove() {
        let mut via_update = Cart::new();
        via_update.add(&product("a", 500, 9), 2).unwrap();
        via_update.add(&product("b", 300, 9), 1).unwrap();
        let mut via_remove = via_update.clone();

        assert_eq!(
            via_update.set_quantity(&ProductId::new("a"), 0).unwrap(),
            UpdateOutcome::Removed
        );
        via_remove.remove(&ProductId::new("a"));
        assert_eq!(via_update, via_remove);
    }

    #[test]
    fn test_set_quantity_checks_line_stock() {
        let mut cart = Cart::new();
        cart.add(&product("a", 500, 4), 1).unwrap();

        assert_eq!(
            cart.set_quantity(&ProductId::new("a"), 5),
            Err(CartError::InsufficientStock { available: 4 })
        );
        assert_eq!(cart.total_items(), 1);

        assert_eq!(cart.set_quantity(&ProductId::new("a"), 4).unwrap(), UpdateOutcome::Updated);
        assert_eq!(cart.total_items(), 4);
    }

    #[test]
    fn test_set_quantity_absent_is_noop() {
        let mut cart = Cart::new();
        assert_eq!(cart.set_quantity(&ProductId::new("a"), 3).unwrap(), UpdateOutcome::Absent);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_totals_hold_across_operation_sequence() {
        let mut cart = Cart::new();
        let a = product("a", 1050, 10);
        let b = product("b", 299, 3);

        cart.add(&a, 2).unwrap();
        assert_totals_consistent(&cart);
        cart.add(&b, 3).unwrap();
        assert_totals_consistent(&cart);
        let _ = cart.add(&b, 1);
        assert_totals_consistent(&cart);
        cart.set_quantity(&a.id, 7).unwrap();
        assert_totals_consistent(&cart);
        cart.remove(&b.id);
        assert_totals_consistent(&cart);
        cart.set_quantity(&a.id, 0).unwrap();
        assert_totals_consistent(&cart);
        assert_eq!(cart.total_price(), Decimal::ZERO);
    }

    // =========================================================================
    // Normalization
    // =========================================================================

    #[test]
    fn test_from_lines_drops_zero_and_duplicates() {
        let lines = vec![
            CartLineItem::new(product("a", 100, 5), 2),
            CartLineItem::new(product("b", 100, 5), 0),
            CartLineItem::new(product("a", 100, 5), 4),
            CartLineItem::new(product("c", 100, 5), 1),
        ];

        let (cart, discarded) = Cart::from_lines(lines);
        assert_eq!(discarded, 2);
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.lines()[1].product.id.as_str(), "c");
    }
}
