//! Identity extractors.
//!
//! Two identities matter to the cart:
//!
//! - the signed-in user ([`OptionalAuth`]), written to the session by the
//!   auth service, which selects the remote cart;
//! - the visitor ([`Visitor`]), a random ID minted on first contact that
//!   names the browser's local cart slot and its cart engine.

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
};
use tower_sessions::Session;
use uuid::Uuid;

use crate::error::{AppError, set_sentry_user};
use crate::models::{CurrentUser, session_keys};

/// Extractor that optionally gets the current user.
///
/// Does not reject the request if the user is not logged in.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(
///     OptionalAuth(user): OptionalAuth,
/// ) -> impl IntoResponse {
///     match user {
///         Some(u) => format!("Hello, {}!", u.id),
///         None => "Hello, guest!".to_string(),
///     }
/// }
/// ```
pub struct OptionalAuth(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = match parts.extensions.get::<Session>() {
            Some(session) => session
                .get::<CurrentUser>(session_keys::CURRENT_USER)
                .await
                .ok()
                .flatten(),
            None => None,
        };

        if let Some(user) = &user {
            set_sentry_user(&user.id);
        }

        Ok(Self(user))
    }
}

/// Extractor for the visitor ID, minting and storing one on first use.
pub struct Visitor(pub String);

impl<S> FromRequestParts<S> for Visitor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .ok_or_else(|| AppError::Internal("session layer missing".to_string()))?;

        if let Some(visitor_id) = session.get::<String>(session_keys::VISITOR_ID).await? {
            return Ok(Self(visitor_id));
        }

        let visitor_id = Uuid::new_v4().to_string();
        session.insert(session_keys::VISITOR_ID, &visitor_id).await?;
        tracing::debug!(visitor_id = %visitor_id, "New visitor");
        Ok(Self(visitor_id))
    }
}
