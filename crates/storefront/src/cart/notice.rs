//! User-facing cart notifications.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::debug;

use tienda_core::ProductId;

/// Something the shopper should be told about.
///
/// Emitted on the engine's broadcast channel; the presentation layer turns
/// these into toasts. Nothing here is an error the caller must handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CartNotice {
    /// A line was inserted or its quantity increased.
    ItemAdded {
        product_id: ProductId,
        name: String,
        quantity: u32,
    },
    /// A line was dropped.
    ItemRemoved { product_id: ProductId },
    /// An add or update was rejected.
    InsufficientStock { product_id: ProductId, available: u32 },
    /// "Could not save your cart": a persistence write failed and the
    /// in-memory cart is now ahead of storage.
    SaveFailed { message: String },
    /// Loading the cart for a new identity failed; the previous in-memory
    /// cart is still shown.
    LoadFailed { message: String },
}

impl CartNotice {
    /// Short human-readable text.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::ItemAdded { name, .. } => format!("{name} added to your cart"),
            Self::ItemRemoved { .. } => "Item removed from your cart".to_owned(),
            Self::InsufficientStock { available, .. } => {
                format!("Only {available} available in stock")
            }
            Self::SaveFailed { .. } => "Could not save your cart".to_owned(),
            Self::LoadFailed { .. } => "Could not load your cart".to_owned(),
        }
    }

    /// Whether this notice reports a failure rather than a confirmation.
    #[must_use]
    pub const fn is_warning(&self) -> bool {
        !matches!(self, Self::ItemAdded { .. } | Self::ItemRemoved { .. })
    }
}

/// Failure notices waiting for the next response to a shopper.
///
/// Save and load failures happen in background tasks after a request has
/// been answered, so a request-driven client can only learn about them on
/// its next call. The inbox subscribes to an engine's notices and hands out
/// the failures collected since it was last drained. Confirmations are
/// dropped; the response to the mutation already reflects them.
#[derive(Debug)]
pub struct NoticeInbox {
    receiver: Mutex<broadcast::Receiver<CartNotice>>,
}

impl NoticeInbox {
    #[must_use]
    pub const fn new(receiver: broadcast::Receiver<CartNotice>) -> Self {
        Self {
            receiver: Mutex::new(receiver),
        }
    }

    /// Messages for the failures received since the last call, each at
    /// most once.
    #[must_use]
    pub fn take_warnings(&self) -> Vec<String> {
        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        let mut warnings: Vec<String> = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(notice @ (CartNotice::SaveFailed { .. } | CartNotice::LoadFailed { .. })) => {
                    let message = notice.message();
                    if !warnings.contains(&message) {
                        warnings.push(message);
                    }
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Cart notice inbox lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return warnings,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn save_failed() -> CartNotice {
        CartNotice::SaveFailed {
            message: "remote writes offline".to_owned(),
        }
    }

    #[test]
    fn test_message_includes_available_stock() {
        let notice = CartNotice::InsufficientStock {
            product_id: ProductId::new("p1"),
            available: 3,
        };
        assert_eq!(notice.message(), "Only 3 available in stock");
        assert!(notice.is_warning());
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let notice = CartNotice::ItemRemoved {
            product_id: ProductId::new("p1"),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "item_removed");
        assert_eq!(json["product_id"], "p1");
        assert!(!notice.is_warning());
    }

    #[test]
    fn test_inbox_keeps_only_failures_once() {
        let (sender, receiver) = broadcast::channel(8);
        let inbox = NoticeInbox::new(receiver);

        sender
            .send(CartNotice::ItemRemoved {
                product_id: ProductId::new("p1"),
            })
            .unwrap();
        sender.send(save_failed()).unwrap();
        sender.send(save_failed()).unwrap();
        sender
            .send(CartNotice::LoadFailed {
                message: "slot unreadable".to_owned(),
            })
            .unwrap();

        assert_eq!(
            inbox.take_warnings(),
            vec!["Could not save your cart", "Could not load your cart"]
        );
        assert!(inbox.take_warnings().is_empty());
    }

    #[test]
    fn test_inbox_survives_lag() {
        let (sender, receiver) = broadcast::channel(2);
        let inbox = NoticeInbox::new(receiver);

        for _ in 0..5 {
            sender.send(save_failed()).unwrap();
        }

        assert_eq!(inbox.take_warnings(), vec!["Could not save your cart"]);
    }
}
