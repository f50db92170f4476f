//! Checkout route handler.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::instrument;

use tienda_core::{CheckoutDetails, OrderId};

use super::cart::visitor_cart;
use crate::checkout::place_order;
use crate::error::{Result, add_breadcrumb};
use crate::middleware::{OptionalAuth, Visitor};
use crate::state::AppState;

/// Response for a placed order.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub order_id: OrderId,
    /// Save or load failures since the previous response.
    pub warnings: Vec<String>,
}

/// Place an order for the visitor's cart (payment is simulated).
#[instrument(skip(state, user, details))]
pub async fn place(
    State(state): State<AppState>,
    Visitor(visitor): Visitor,
    OptionalAuth(user): OptionalAuth,
    Json(details): Json<CheckoutDetails>,
) -> Result<(StatusCode, Json<OrderPlaced>)> {
    let cart = visitor_cart(&state, &visitor, user).await;
    let order_id = place_order(&cart.engine, state.orders(), details).await?;

    add_breadcrumb("checkout", "Order placed", Some(&[("order_id", order_id.as_str())]));
    Ok((
        StatusCode::CREATED,
        Json(OrderPlaced {
            order_id,
            warnings: cart.inbox.take_warnings(),
        }),
    ))
}
