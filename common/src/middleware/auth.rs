//! User identity middleware.
//!
//! Authentication happens upstream; this layer only picks up the opaque user
//! id the session layer forwards and makes it available to handlers and logs.

use axum::{
    body::Body,
    http::{header::HeaderName, Request},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;

/// Header carrying the authenticated user id.
pub static USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Opaque id of the authenticated user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reads the user id header, if present and non-empty.
pub fn extract_user_id(req: &Request<Body>) -> Option<UserId> {
    req.headers()
        .get(&USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| UserId(v.to_string()))
}

/// Rejects requests without a user id; otherwise stores it in extensions.
pub async fn require_user_id(mut req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let user_id = extract_user_id(&req)
        .ok_or_else(|| AppError::Unauthorized("missing x-user-id header".into()))?;
    tracing::debug!(user_id = %user_id, "user identified");
    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|Extension(user): Extension<UserId>| async move { user.0 }),
            )
            .layer(middleware::from_fn(require_user_id))
    }

    #[tokio::test]
    async fn test_missing_user_id_is_unauthorized() {
        let res = app()
            .oneshot(Request::get("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_user_id_reaches_handler() {
        let req = Request::get("/whoami")
            .header("x-user-id", "42")
            .body(Body::empty())
            .unwrap();
        let res = app().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"42");
    }
}
