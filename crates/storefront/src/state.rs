//! Application state shared across handlers.

use std::sync::Arc;

use moka::future::Cache;
use sqlx::PgPool;

use crate::cart::{CartEngine, NoticeInbox};
use crate::config::StorefrontConfig;
use crate::db::{PgCartSlot, PgCartStore, PgOrderSink};

/// The engine type the HTTP API runs: local slots and remote carts both in
/// `PostgreSQL`.
pub type VisitorCartEngine = CartEngine<PgCartSlot, PgCartStore>;

/// A visitor's engine and the inbox that carries its background failures
/// to the visitor's next response.
#[derive(Debug, Clone)]
pub struct VisitorCart {
    pub engine: VisitorCartEngine,
    pub inbox: Arc<NoticeInbox>,
}

impl VisitorCart {
    fn new(engine: VisitorCartEngine) -> Self {
        let inbox = Arc::new(engine.inbox());
        Self { engine, inbox }
    }
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    carts: PgCartStore,
    orders: PgOrderSink,
    /// One engine per visitor, keyed by visitor ID. Eviction detaches the
    /// engine so its live-sync subscription is released.
    engines: Cache<String, VisitorCart>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` connection pool
    #[must_use]
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Self {
        let engines = Cache::builder()
            .max_capacity(config.cart_engines.capacity)
            .time_to_idle(config.cart_engines.idle_timeout)
            .eviction_listener(|visitor_id, cart: VisitorCart, cause| {
                tracing::debug!(visitor_id = %visitor_id, ?cause, "Cart engine evicted");
                cart.engine.detach();
            })
            .build();

        Self {
            inner: Arc::new(AppStateInner {
                carts: PgCartStore::new(pool.clone()),
                orders: PgOrderSink::new(pool.clone()),
                config,
                pool,
                engines,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the order sink used at checkout.
    #[must_use]
    pub fn orders(&self) -> &PgOrderSink {
        &self.inner.orders
    }

    /// The cart for `visitor_id`, created on first use.
    ///
    /// A new engine has not loaded anything yet; callers set the identity
    /// before reading it.
    pub async fn visitor_cart(&self, visitor_id: &str) -> VisitorCart {
        self.inner
            .engines
            .get_with_by_ref(visitor_id, async {
                VisitorCart::new(CartEngine::new(
                    PgCartSlot::new(self.inner.pool.clone(), visitor_id),
                    self.inner.carts.clone(),
                ))
            })
            .await
    }
}
