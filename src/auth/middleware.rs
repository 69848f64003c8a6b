//! Auth middleware for Axum routes.
//!
//! Verifies the CRM token and injects its `Claims` into request extensions.
//! When no `auth` section is configured the service runs in no-auth mode
//! and every request carries anonymous claims.

use super::token::{locate_token, Claims, TokenError};
use crate::api::handlers::{AppError, NotificationState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Unauthorized(err.to_string())
    }
}

/// Middleware that requires a valid CRM token.
///
/// # Behavior
/// 1. No verifier configured → anonymous claims, request passes
/// 2. Token from `Authorization: Bearer` or `?token=` → 401 if absent
/// 3. Signature and expiry checked → 401 if invalid/expired
/// 4. `allowed_email_domain`, if set → 403 unless the token's email matches
/// 5. `Claims` inserted into request extensions
pub async fn require_auth(
    State(state): State<NotificationState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(verifier) = state.verifier.as_ref() else {
        req.extensions_mut().insert(Claims::anonymous());
        return Ok(next.run(req).await);
    };

    let (token, source) = locate_token(req.headers(), req.uri())?;
    let claims = verifier.verify(&token)?;

    let domain = state
        .auth_config
        .as_ref()
        .and_then(|auth| auth.allowed_email_domain.as_deref());
    if let Some(domain) = domain {
        if !claims.email_in_domain(domain) {
            return Err(AppError::Forbidden(format!(
                "Email domain not allowed (expected @{})",
                domain
            )));
        }
    }

    debug!(user = %claims.sub, ?source, "Request authenticated");
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::extractor::AuthUser;
    use crate::test_helpers::{mint_token, test_auth_config, test_state};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app(state: NotificationState) -> Router {
        async fn whoami(user: AuthUser) -> String {
            user.user_id
        }

        Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state.clone(), require_auth))
            .with_state(state)
    }

    async fn call(app: Router, uri: &str, auth: Option<String>) -> (StatusCode, String) {
        let mut req = HttpRequest::builder().uri(uri);
        if let Some(auth) = auth {
            req = req.header("authorization", auth);
        }
        let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_no_auth_mode_serves_anonymous() {
        let (status, body) = call(app(test_state(None)), "/whoami", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "anonymous");
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let app = app(test_state(Some(test_auth_config())));

        let (status, _) = call(app.clone(), "/whoami", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(app.clone(), "/whoami", Some("Basic dXNlcjpwYXNz".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(app, "/whoami", Some("Bearer forged.token.value".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("invalid token"));
    }

    #[tokio::test]
    async fn test_expired_token_returns_401() {
        let app = app(test_state(Some(test_auth_config())));
        let token = mint_token("staff-1", None, -3600);

        let (status, body) = call(app, "/whoami", Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("expired"));
    }

    #[tokio::test]
    async fn test_header_and_query_tokens_accepted() {
        let app = app(test_state(Some(test_auth_config())));

        let token = mint_token("staff-7", None, 3600);
        let (status, body) = call(app.clone(), "/whoami", Some(format!("Bearer {}", token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "staff-7");

        let token = mint_token("staff-8", None, 3600);
        let uri = format!("/whoami?entities=Invoice&token={}", token);
        let (status, body) = call(app, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "staff-8");
    }

    #[tokio::test]
    async fn test_email_domain_restriction() {
        let mut config = test_auth_config();
        config.allowed_email_domain = Some("artcenter.org".to_string());
        let app = app(test_state(Some(config)));

        let outsider = mint_token("u1", Some("someone@gmail.com"), 3600);
        let (status, _) = call(app.clone(), "/whoami", Some(format!("Bearer {}", outsider))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let no_email = mint_token("u2", None, 3600);
        let (status, _) = call(app.clone(), "/whoami", Some(format!("Bearer {}", no_email))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let staff = mint_token("u3", Some("desk@artcenter.org"), 3600);
        let (status, body) = call(app, "/whoami", Some(format!("Bearer {}", staff))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "u3");
    }
}
