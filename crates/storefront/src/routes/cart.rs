//! Cart route handlers.
//!
//! Every handler resolves the visitor's engine and brings it to the
//! request's identity first, so a login or logout observed in the session
//! triggers the load/merge before the cart is read or changed. Mutations
//! answer as soon as memory is updated; persistence finishes in the
//! background, and a failure there is reported in the `warnings` of the
//! visitor's next cart response.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tienda_core::{CartLineItem, CurrencyCode, Price, ProductId, ProductSnapshot};

use crate::cart::CartSnapshot;
use crate::error::{Result, add_breadcrumb};
use crate::middleware::{OptionalAuth, Visitor};
use crate::models::CurrentUser;
use crate::state::{AppState, VisitorCart};

/// Currency carts are priced in.
const CART_CURRENCY: CurrencyCode = CurrencyCode::PEN;

// =============================================================================
// Views
// =============================================================================

/// One cart line as shown on the cart page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub product_id: ProductId,
    pub name: String,
    pub image_url: String,
    pub quantity: u32,
    pub stock: u32,
    pub unit_price: String,
    pub line_total: String,
}

/// The cart page payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub cart_key: String,
    pub is_loading: bool,
    pub items: Vec<CartLineView>,
    pub total_items: u32,
    pub total_price: Decimal,
    pub formatted_total: String,
    /// Save or load failures since the previous response.
    pub warnings: Vec<String>,
}

/// Navbar badge payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartCount {
    pub count: u32,
}

fn format_amount(amount: Decimal) -> String {
    Price::new(amount, CART_CURRENCY).format()
}

impl From<&CartLineItem> for CartLineView {
    fn from(line: &CartLineItem) -> Self {
        Self {
            product_id: line.product.id.clone(),
            name: line.product.name.clone(),
            image_url: line.product.image_url.clone(),
            quantity: line.quantity,
            stock: line.product.stock,
            unit_price: format_amount(line.product.price),
            line_total: format_amount(line.line_total()),
        }
    }
}

impl CartView {
    #[must_use]
    pub fn new(snapshot: &CartSnapshot, warnings: Vec<String>) -> Self {
        Self {
            cart_key: snapshot.cart_key.to_string(),
            is_loading: snapshot.is_loading(),
            items: snapshot.items.iter().map(CartLineView::from).collect(),
            total_items: snapshot.total_items,
            total_price: snapshot.total_price,
            formatted_total: format_amount(snapshot.total_price),
            warnings,
        }
    }

    /// The visitor's current cart, draining its pending warnings.
    fn render(cart: &VisitorCart) -> Self {
        Self::new(&cart.engine.snapshot(), cart.inbox.take_warnings())
    }
}

impl From<&CartSnapshot> for CartCount {
    fn from(snapshot: &CartSnapshot) -> Self {
        Self {
            count: if snapshot.is_loading() {
                0
            } else {
                snapshot.total_items
            },
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Add to cart request. `product` is the catalog snapshot the shopper is
/// looking at; its stock bounds the quantity.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product: ProductSnapshot,
    pub quantity: Option<u32>,
}

/// Update quantity request.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

/// The visitor's cart, loaded for the request's identity.
pub(crate) async fn visitor_cart(
    state: &AppState,
    visitor_id: &str,
    user: Option<CurrentUser>,
) -> VisitorCart {
    let cart = state.visitor_cart(visitor_id).await;
    cart.engine.set_identity(user.map(|user| user.id)).await;
    cart
}

// =============================================================================
// Handlers
// =============================================================================

/// Display cart.
#[instrument(skip(state, user))]
pub async fn show(
    State(state): State<AppState>,
    Visitor(visitor): Visitor,
    OptionalAuth(user): OptionalAuth,
) -> Json<CartView> {
    let cart = visitor_cart(&state, &visitor, user).await;
    Json(CartView::render(&cart))
}

/// Cart count badge. Leaves pending warnings for the next cart response.
#[instrument(skip(state, user))]
pub async fn count(
    State(state): State<AppState>,
    Visitor(visitor): Visitor,
    OptionalAuth(user): OptionalAuth,
) -> Json<CartCount> {
    let cart = visitor_cart(&state, &visitor, user).await;
    Json(CartCount::from(&cart.engine.snapshot()))
}

/// Add item to cart.
#[instrument(skip(state, user, request), fields(product_id = %request.product.id))]
pub async fn add(
    State(state): State<AppState>,
    Visitor(visitor): Visitor,
    OptionalAuth(user): OptionalAuth,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<CartView>> {
    let cart = visitor_cart(&state, &visitor, user).await;
    cart.engine
        .add_item(&request.product, request.quantity.unwrap_or(1))?;

    add_breadcrumb(
        "cart",
        "Added item",
        Some(&[("product_id", request.product.id.as_str())]),
    );
    Ok(Json(CartView::render(&cart)))
}

/// Update cart item quantity. Zero removes the line.
#[instrument(skip(state, user, request))]
pub async fn update(
    State(state): State<AppState>,
    Visitor(visitor): Visitor,
    OptionalAuth(user): OptionalAuth,
    Path(product_id): Path<ProductId>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<Json<CartView>> {
    let cart = visitor_cart(&state, &visitor, user).await;
    cart.engine.update_quantity(&product_id, request.quantity)?;
    Ok(Json(CartView::render(&cart)))
}

/// Remove item from cart.
#[instrument(skip(state, user))]
pub async fn remove(
    State(state): State<AppState>,
    Visitor(visitor): Visitor,
    OptionalAuth(user): OptionalAuth,
    Path(product_id): Path<ProductId>,
) -> Json<CartView> {
    let cart = visitor_cart(&state, &visitor, user).await;
    cart.engine.remove_item(&product_id);
    Json(CartView::render(&cart))
}

/// Empty the cart.
#[instrument(skip(state, user))]
pub async fn clear(
    State(state): State<AppState>,
    Visitor(visitor): Visitor,
    OptionalAuth(user): OptionalAuth,
) -> StatusCode {
    let cart = visitor_cart(&state, &visitor, user).await;
    cart.engine.clear_cart();
    add_breadcrumb("cart", "Emptied cart", None);
    StatusCode::NO_CONTENT
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, header},
    };
    use secrecy::SecretString;
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use tienda_core::CartKey;
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};

    use super::*;
    use crate::cart::CartPhase;
    use crate::config::{CartEngineConfig, StorefrontConfig};

    fn snapshot(phase: CartPhase) -> CartSnapshot {
        let line = CartLineItem::new(
            ProductSnapshot::new("p1", "Polo Inca", Decimal::new(4550, 2), 6),
            2,
        );
        CartSnapshot {
            cart_key: CartKey::anonymous(),
            phase,
            total_items: 2,
            total_price: line.line_total(),
            items: vec![line],
        }
    }

    #[test]
    fn test_cart_view_formats_prices() {
        let view = CartView::new(&snapshot(CartPhase::Ready), Vec::new());
        assert_eq!(view.cart_key, "anonymous_cart");
        assert_eq!(view.formatted_total, "S/ 91.00");
        assert_eq!(view.items.first().unwrap().unit_price, "S/ 45.50");
        assert!(!view.is_loading);
        assert!(view.warnings.is_empty());
    }

    #[test]
    fn test_count_is_zero_while_loading() {
        assert_eq!(CartCount::from(&snapshot(CartPhase::Loading)).count, 0);
        assert_eq!(CartCount::from(&snapshot(CartPhase::Ready)).count, 2);
    }

    #[test]
    fn test_add_request_defaults_quantity() {
        let request: AddItemRequest =
            serde_json::from_str(r#"{"product":{"id":"p1","price":"10.00","stock":3}}"#).unwrap();
        assert_eq!(request.quantity, None);
        assert_eq!(request.product.stock, 3);
    }

    // =========================================================================
    // Routes
    // =========================================================================

    /// A router whose database is unreachable, so every slot read and write
    /// fails after a short acquire timeout.
    fn offline_app() -> Router {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(100))
            .connect_lazy("postgres://tienda@127.0.0.1:1/tienda")
            .unwrap();
        let config = StorefrontConfig {
            database_url: SecretString::from("postgres://tienda@127.0.0.1:1/tienda"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: "http://localhost:3000".to_owned(),
            cart_engines: CartEngineConfig::default(),
            sentry_dsn: None,
            sentry_environment: "test".to_owned(),
        };

        crate::routes::routes()
            .with_state(AppState::new(config, pool))
            .layer(SessionManagerLayer::new(MemoryStore::default()))
    }

    async fn call(app: &Router, request: Request<Body>) -> (Option<String>, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_owned);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (cookie, serde_json::from_slice(&body).unwrap())
    }

    fn get_cart(cookie: &str) -> Request<Body> {
        Request::get("/cart")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cart_response_reports_background_failures_once() {
        let app = offline_app();

        let (cookie, first) = call(&app, Request::get("/cart").body(Body::empty()).unwrap()).await;
        let cookie = cookie.unwrap();
        assert_eq!(first["warnings"], serde_json::json!(["Could not load your cart"]));

        let (_, again) = call(&app, get_cart(&cookie)).await;
        assert_eq!(again["warnings"], serde_json::json!([]));

        let add = Request::post("/cart/items")
            .header(header::COOKIE, &cookie)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"product":{"id":"p1","price":"10.00","stock":3},"quantity":2}"#,
            ))
            .unwrap();
        let (_, added) = call(&app, add).await;
        assert_eq!(added["totalItems"], 2);

        // The slot write fails in the background after the add answered.
        let mut reported = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let (_, view) = call(&app, get_cart(&cookie)).await;
            assert_eq!(view["totalItems"], 2);
            if view["warnings"] == serde_json::json!(["Could not save your cart"]) {
                reported = true;
                break;
            }
        }
        assert!(reported, "save failure never reached the shopper");

        let (_, after) = call(&app, get_cart(&cookie)).await;
        assert_eq!(after["warnings"], serde_json::json!([]));
    }
}
