//! Session-related types.
//!
//! Types stored in the session. `CurrentUser` is written by the auth
//! service when a shopper signs in and removed on sign-out; this crate only
//! reads it.

use serde::{Deserialize, Serialize};

use tienda_core::{Email, UserId};

/// Session-stored user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User ID issued by the auth service.
    pub id: UserId,
    /// User's email address, when the auth service shares it.
    #[serde(default)]
    pub email: Option<Email>,
}

/// Session keys.
pub mod keys {
    /// Key for storing the current logged-in user.
    pub const CURRENT_USER: &str = "current_user";

    /// Key for the visitor ID that names this browser's local cart slot.
    pub const VISITOR_ID: &str = "visitor_id";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user_without_email() {
        let user: CurrentUser = serde_json::from_str(r#"{"id":"u42"}"#).unwrap();
        assert_eq!(user.id, UserId::new("u42"));
        assert!(user.email.is_none());
    }
}
