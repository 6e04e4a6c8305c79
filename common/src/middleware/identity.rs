//! Identity middleware.
//!
//! Authentication is performed by an upstream identity provider, which
//! forwards the authenticated user id in a trusted header. This layer only
//! answers "is the request authenticated" and "who is the user"; it never
//! stores credentials or issues tokens.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderName, Request},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;

/// Name of the header carrying the authenticated user id.
#[derive(Clone, Debug)]
pub struct UserIdHeader(pub HeaderName);

impl UserIdHeader {
    /// Builds the header from a configured name, falling back to `x-user-id`.
    pub fn new(name: &str) -> Self {
        let header = HeaderName::try_from(name)
            .unwrap_or_else(|_| HeaderName::from_static("x-user-id"));
        Self(header)
    }
}

/// Identity of the user behind the current request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Rejects requests without an asserted user id and records the identity in
/// the request extensions.
pub async fn identity_middleware(
    State(header): State<UserIdHeader>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = req
        .headers()
        .get(&header.0)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| AuthenticatedUser(v.to_string()))
        .ok_or(AppError::Unauthenticated)?;

    tracing::debug!(user_id = %user.0, "请求身份已确认");
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AppError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/me", get(|user: AuthenticatedUser| async move { user.0 }))
            .layer(middleware::from_fn_with_state(
                UserIdHeader::new("x-user-id"),
                identity_middleware,
            ))
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() {
        let req = Request::builder().uri("/me").body(Body::empty()).unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_user_id_reaches_handler() {
        let req = Request::builder()
            .uri("/me")
            .header("x-user-id", "user-42")
            .body(Body::empty())
            .unwrap();
        let resp = app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"user-42");
    }
}
