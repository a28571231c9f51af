//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use course_core::ports::PortError;
use std::sync::Arc;
use tracing::warn;

use crate::web::rest::port_error_response;
use crate::web::state::AppState;

/// Name of the cookie carrying the auth session id.
pub const SESSION_COOKIE: &str = "session";

/// The id of the user behind the current request, set by [`require_auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub i64);

/// Extracts the auth session id from the `Cookie` header, if any.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| {
            let (name, value) = c.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
        })
}

/// Middleware that validates the auth session cookie and extracts the user id.
///
/// If valid, inserts an [`AuthenticatedUser`] into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized. Store failures are 500.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    // 1. Parse session ID from cookie
    let auth_session_id = session_id_from_headers(req.headers())
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?
        .to_string();

    // 2. Validate auth session in database, get user_id
    let user_id = state
        .db
        .validate_auth_session(&auth_session_id)
        .await
        .map_err(|e| match e {
            PortError::Unauthorized | PortError::NotFound(_) => {
                warn!("Rejected auth session: {}", e);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            other => port_error_response("Failed to validate auth session", other),
        })?;

    // 3. Insert the user into request extensions
    req.extensions_mut().insert(AuthenticatedUser(user_id));

    // 4. Continue to the handler
    Ok(next.run(req).await)
}
