//! Order storage.

use sqlx::PgPool;
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

use tienda_core::{OrderDraft, OrderId, UserId};

use super::RepositoryError;
use crate::checkout::OrderSink;

/// Writes placed orders to `storefront.order`.
#[derive(Debug, Clone)]
pub struct PgOrderSink {
    pool: PgPool,
}

impl PgOrderSink {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OrderSink for PgOrderSink {
    #[instrument(skip(self, order), fields(lines = order.items.len(), total = %order.total))]
    async fn place(&self, order: &OrderDraft) -> Result<OrderId, RepositoryError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r"
            INSERT INTO storefront.order (
                id, user_id, customer_name, customer_email, phone,
                shipping_address, payment_method, status, total, items
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(id)
        .bind(order.user_id.as_ref().map(UserId::as_str))
        .bind(&order.customer_name)
        .bind(order.customer_email.as_str())
        .bind(&order.phone)
        .bind(Json(&order.shipping_address))
        .bind(order.payment_method.to_string())
        .bind(order.status.to_string())
        .bind(order.total)
        .bind(Json(&order.items))
        .execute(&self.pool)
        .await?;

        Ok(OrderId::new(id.to_string()))
    }
}
