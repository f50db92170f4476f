//! Remote cart backfill.
//!
//! Older accounts were created before carts moved to the remote store and
//! have no document. This job creates an empty one for each listed user,
//! leaving existing documents (and their items) alone.

use serde::Serialize;
use tracing::{error, info, instrument};

use tienda_core::{CartKey, UserId};

use crate::store::RemoteCartStore;

/// Counts from one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Documents created.
    pub created: usize,
    /// Users that already had a document.
    pub existing: usize,
    /// Users whose document could not be checked or created.
    pub failed: usize,
}

impl BackfillReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.created + self.existing + self.failed
    }
}

/// Ensure every user in `users` has a remote cart document.
///
/// Failures are logged and counted; the run always covers every user.
#[instrument(skip(store, users))]
pub async fn backfill_carts<R: RemoteCartStore>(store: &R, users: &[UserId]) -> BackfillReport {
    let mut report = BackfillReport::default();

    for user in users {
        let key = CartKey::resolve(Some(user));
        match store.create_if_absent(&key).await {
            Ok(true) => report.created += 1,
            Ok(false) => report.existing += 1,
            Err(e) => {
                error!(error = %e, cart_key = %key, "Failed to backfill cart");
                report.failed += 1;
            }
        }
    }

    info!(
        created = report.created,
        existing = report.existing,
        failed = report.failed,
        "Cart backfill complete"
    );
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use tienda_core::{CartLineItem, ProductSnapshot};

    use super::*;
    use crate::store::MemoryCartStore;

    #[tokio::test]
    async fn test_backfill_creates_only_missing_documents() {
        let store = MemoryCartStore::new();
        let ana = UserId::new("ana");
        let line = CartLineItem::new(ProductSnapshot::new("p1", "Polo", Decimal::new(3990, 2), 3), 2);
        store
            .write(&CartKey::resolve(Some(&ana)), std::slice::from_ref(&line))
            .await
            .unwrap();

        let report = backfill_carts(&store, &[ana.clone(), UserId::new("luis")]).await;

        assert_eq!(report, BackfillReport { created: 1, existing: 1, failed: 0 });
        assert_eq!(
            store.document(&CartKey::resolve(Some(&ana))).unwrap().items,
            vec![line]
        );
        assert!(
            store
                .document(&CartKey::resolve(Some(&UserId::new("luis"))))
                .unwrap()
                .items
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_backfill_counts_failures_and_continues() {
        let store = MemoryCartStore::new();
        store.set_fail_writes(true);

        let report = backfill_carts(&store, &[UserId::new("a"), UserId::new("b")]).await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.total(), 2);
    }
}
