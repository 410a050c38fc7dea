// =============================================================================
// AUTH MODULE
// =============================================================================
// Access control for the device routes.
//
// Callers present `Authorization: Bearer <jwt>`; the token is verified with
// the shared HS256 secret and must list the directory-management permission.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppState;

/// Claims carried by a caller's access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub exp: usize,
}

/// Secret and permission name the middleware checks against.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub permission: String,
}

/// Middleware: reject callers without the directory-management permission.
///
/// Verified claims are stored as a request extension.
pub async fn require_directory_permission(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())?;
    let claims = decode_token(token, &state.auth.jwt_secret)?;

    if !claims.permissions.iter().any(|p| p == &state.auth.permission) {
        tracing::warn!(sub = %claims.sub, "Caller lacks directory permission");
        return Err(AppError::Forbidden(format!(
            "permission '{}' required",
            state.auth.permission
        )));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Sign a token for `sub` holding `permissions`, valid for `ttl_secs`.
pub fn issue_token(
    sub: &str,
    permissions: &[&str],
    ttl_secs: usize,
    jwt_secret: &str,
) -> Result<String, AppError> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: sub.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        exp: now + ttl_secs,
    };
    let key = jsonwebtoken::EncodingKey::from_secret(jwt_secret.as_bytes());
    jsonwebtoken::encode(&jsonwebtoken::Header::default(), &claims, &key)
        .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".into()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("expected a Bearer token".into()))
}

fn decode_token(token: &str, jwt_secret: &str) -> Result<Claims, AppError> {
    let key = jsonwebtoken::DecodingKey::from_secret(jwt_secret.as_bytes());
    let validation = jsonwebtoken::Validation::default();
    jsonwebtoken::decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))
}
