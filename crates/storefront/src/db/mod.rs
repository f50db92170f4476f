//! Database operations for storefront `PostgreSQL`.
//!
//! # Database: `tienda_storefront`
//!
//! ## Tables
//!
//! - `storefront.cart` - Remote carts, one row per cart key (JSONB items)
//! - `storefront.visitor_cart` - Server-side local slots, one per visitor
//! - `storefront.order` - Orders placed at checkout
//! - `tower_sessions.session` - Tower-sessions storage
//!
//! Changes to `storefront.cart` are announced on the
//! `storefront_cart_changed` channel (payload: the cart key).
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p tienda-cli -- migrate
//! ```

pub mod carts;
pub mod orders;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use carts::{CartChangeHub, PgCartSlot, PgCartStore};
pub use orders::PgOrderSink;

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
