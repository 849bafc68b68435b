//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::web::state::AppState;

/// Middleware that validates the bearer token and resolves the caller's
/// identity.
///
/// If valid, inserts the `AuthContext` into request extensions for handlers
/// to use. If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract the Authorization header.
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. It must carry a bearer token.
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 3. Resolve the token to an identity.
    let ctx = state.verifier.verify(token).await.map_err(|e| {
        debug!("token verification failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    // 4. Insert the identity into request extensions.
    req.extensions_mut().insert(ctx);

    // 5. Continue to the handler.
    Ok(next.run(req).await)
}
