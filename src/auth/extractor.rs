//! AuthUser extractor for Axum handlers.
//!
//! Reads the `Claims` that `require_auth` put into request extensions.

use super::token::Claims;
use crate::api::handlers::{AppError, NotificationState};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// The caller of a request
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// CRM user id (`anonymous` in no-auth mode)
    pub user_id: String,
    pub anonymous: bool,
}

impl AuthUser {
    fn from_claims(claims: &Claims) -> Result<Self, AppError> {
        if claims.sub.trim().is_empty() {
            return Err(AppError::Unauthorized(
                "Token has an empty subject".to_string(),
            ));
        }

        Ok(Self {
            user_id: claims.sub.clone(),
            anonymous: claims.is_anonymous(),
        })
    }

    /// The id to attribute a change to, if the caller is a real user
    pub fn actor_id(&self) -> Option<String> {
        (!self.anonymous).then(|| self.user_id.clone())
    }
}

impl FromRequestParts<NotificationState> for AuthUser {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &NotificationState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async {
            let claims = parts.extensions.get::<Claims>().ok_or_else(|| {
                AppError::Unauthorized("Authentication required, no claims in request".to_string())
            })?;

            Self::from_claims(claims)
        }
    }
}
