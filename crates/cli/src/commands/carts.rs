//! Cart maintenance commands.
//!
//! # Usage
//!
//! ```bash
//! # Create an empty remote cart for users that have none
//! tienda carts backfill user-1 user-2
//!
//! # Print a user's remote cart
//! tienda carts show user-1
//!
//! # Load a native client's cart file as user-1
//! tienda carts import --slot ~/.tienda/cart.json --user user-1
//! ```
//!
//! `import` runs the same load the storefront runs at sign-in: if the user
//! already has a remote cart it wins and the file is left alone, otherwise
//! the file's items become the remote cart and the file is cleared. It
//! does not follow the cart afterwards, so no listener connection is opened.

use std::path::PathBuf;

use thiserror::Error;

use tienda_core::{CartKey, UserId};
use tienda_storefront::cart::{BackfillReport, CartEngine, LoadOutcome, backfill_carts};
use tienda_storefront::db::PgCartStore;
use tienda_storefront::store::{FileCartSlot, RemoteCartStore, StoreError};

use super::{ConnectError, connect};

/// Errors that can occur during cart commands.
#[derive(Debug, Error)]
pub enum CartsError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Some users could not be backfilled.
    #[error("Backfill failed for {0} user(s)")]
    BackfillIncomplete(usize),

    /// The import could not read or write the stores.
    #[error("Import failed: {0:?}")]
    ImportFailed(LoadOutcome),
}

/// Create missing remote cart documents for `users`.
pub async fn backfill(users: &[String]) -> Result<BackfillReport, CartsError> {
    let pool = connect().await?;
    let store = PgCartStore::new(pool);

    let users: Vec<UserId> = users.iter().map(UserId::new).collect();
    let report = backfill_carts(&store, &users).await;

    tracing::info!(
        "Backfill complete: {} created, {} already present, {} failed",
        report.created,
        report.existing,
        report.failed
    );

    if report.failed > 0 {
        return Err(CartsError::BackfillIncomplete(report.failed));
    }
    Ok(report)
}

/// Print `user`'s remote cart document as JSON.
pub async fn show(user: &str) -> Result<(), CartsError> {
    let pool = connect().await?;
    let store = PgCartStore::new(pool);
    let key = CartKey::resolve(Some(&UserId::new(user)));

    let Some(document) = store.read(&key).await? else {
        tracing::warn!("No remote cart for {}", key);
        return Ok(());
    };

    let json = serde_json::to_string_pretty(&document)?;
    #[allow(clippy::print_stdout)]
    {
        println!("{json}");
    }
    Ok(())
}

/// Load the cart file at `slot` as `user` and wait for every write.
pub async fn import(slot: PathBuf, user: &str) -> Result<LoadOutcome, CartsError> {
    let pool = connect().await?;

    tracing::info!("Importing {} as {}", slot.display(), user);
    let engine = CartEngine::new(FileCartSlot::new(slot), PgCartStore::new(pool));
    let outcome = engine.load_once(Some(UserId::new(user))).await;
    engine.settle().await;

    match outcome {
        LoadOutcome::Migrated { lines } => {
            tracing::info!("Imported {} line(s) into the remote cart", lines);
        }
        LoadOutcome::Remote => {
            tracing::warn!("User already has a remote cart; the file was left untouched");
        }
        LoadOutcome::Empty => tracing::info!("Cart file is empty; nothing to import"),
        LoadOutcome::MigrationFailed { .. }
        | LoadOutcome::Failed
        | LoadOutcome::Local
        | LoadOutcome::Superseded => return Err(CartsError::ImportFailed(outcome)),
    }
    Ok(outcome)
}
