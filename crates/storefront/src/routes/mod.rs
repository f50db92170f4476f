//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health               - Liveness check
//! GET    /health/ready         - Readiness check (database)
//!
//! # Cart (JSON)
//! GET    /cart                 - Cart contents and totals
//! GET    /cart/count           - Badge count (0 while loading)
//! POST   /cart/items           - Add item {product, quantity?}
//! PUT    /cart/items/{id}      - Set quantity {quantity}
//! DELETE /cart/items/{id}      - Remove item
//! DELETE /cart                 - Empty cart
//!
//! # Checkout
//! POST   /checkout             - Place order, empty cart
//! ```

pub mod cart;
pub mod checkout;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::state::AppState;

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show).delete(cart::clear))
        .route("/count", get(cart::count))
        .route("/items", post(cart::add))
        .route("/items/{id}", put(cart::update).delete(cart::remove))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart_routes())
        .route("/checkout", post(checkout::place))
}
