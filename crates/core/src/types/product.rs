//! Product snapshots embedded in cart lines.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// A point-in-time copy of a catalog product.
///
/// Carts store the whole snapshot rather than just the id, so `price` and
/// `stock` reflect the moment the shopper last touched the line and may be
/// stale relative to the live catalog. Every field except `id` falls back to
/// its default when missing from stored JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Unit price; never negative.
    #[serde(default)]
    pub price: Decimal,
    /// Units available when the snapshot was taken.
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProductSnapshot {
    /// Create a snapshot with the fields the cart depends on.
    #[must_use]
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Decimal, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            price: price.max(Decimal::ZERO),
            stock,
            image_url: String::new(),
            category: String::new(),
            created_at: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_are_default_filled() {
        let snapshot: ProductSnapshot = serde_json::from_str(r#"{"id":"p1","price":12.5}"#).unwrap();
        assert_eq!(snapshot.id.as_str(), "p1");
        assert_eq!(snapshot.price, Decimal::new(125, 1));
        assert_eq!(snapshot.stock, 0);
        assert!(snapshot.name.is_empty());
        assert!(snapshot.created_at.is_none());
    }

    #[test]
    fn test_price_accepts_string_form() {
        let snapshot: ProductSnapshot =
            serde_json::from_str(r#"{"id":"p1","price":"19.90","stock":3,"imageUrl":"/a.png"}"#)
                .unwrap();
        assert_eq!(snapshot.price, Decimal::new(1990, 2));
        assert_eq!(snapshot.image_url, "/a.png");
    }

    #[test]
    fn test_new_clamps_negative_price() {
        let snapshot = ProductSnapshot::new("p1", "Polo", Decimal::new(-5, 0), 1);
        assert_eq!(snapshot.price, Decimal::ZERO);
    }
}
