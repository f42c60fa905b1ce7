//! Authentication middleware
//!
//! Extracts and validates bearer tokens from requests.

use crate::auth::{decode_token, Actor, Role};
use crate::error::AppError;
use crate::state::SharedState;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Resolve the caller and attach it to the request as an [`Actor`]
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization format".to_string()))?;

    let claims = decode_token(&state.jwt_secret, token)?;

    request.extensions_mut().insert(Actor::from(claims));

    Ok(next.run(request).await)
}

/// Require a role capability for an administrative or read endpoint
pub fn require(actor: &Actor, allowed: impl Fn(&Role) -> bool, action: &str) -> Result<(), AppError> {
    if !allowed(&actor.role) {
        return Err(AppError::PermissionDenied(format!(
            "Role {} may not {}",
            actor.role, action
        )));
    }
    Ok(())
}
