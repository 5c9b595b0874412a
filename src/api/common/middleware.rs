use axum::{
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use cookie::Cookie;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::AppError;

/// Per-request identity, refreshed from the token on every request rather
/// than cached client-side. `center_id` is absent for platform admins.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: String,
    pub role: String,
    pub center_id: Option<String>,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn is_student(&self) -> bool {
        self.role == "student"
    }

    /// Rejects cross-center access before any row is read or written.
    pub fn authorize_center(&self, center_id: &str) -> Result<(), AppError> {
        if self.is_admin() {
            return Ok(());
        }
        match &self.center_id {
            Some(own) if own == center_id => Ok(()),
            _ => Err(AppError::Forbidden(format!(
                "You do not have access to center '{}'",
                center_id
            ))),
        }
    }
}

pub async fn auth_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let secret = std::env::var("SECRET_TOKEN").map_err(|e| {
        error!("SECRET_TOKEN not set: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let token = extract_token(&request).ok_or(StatusCode::UNAUTHORIZED)?;

    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )
    .map_err(|e| {
        error!("JWT validation failed: {:?}", e);
        StatusCode::UNAUTHORIZED
    })?;

    request.extensions_mut().insert(token_data.claims);
    Ok(next.run(request).await)
}

/// Extracts JWT from either the `Authorization` header or `Cookie` header.
fn extract_token<B>(req: &Request<B>) -> Option<String> {
    // Check Authorization: Bearer <token>
    if let Some(auth_header) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    // Check Cookie: auth-token=<token>
    if let Some(cookie_header) = req.headers().get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Ok(parsed) = Cookie::parse(cookie.trim()) {
                    if parsed.name() == "auth-token" {
                        return Some(parsed.value().to_string());
                    }
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: &str, center_id: Option<&str>) -> Claims {
        Claims {
            sub: "user@example.com".to_string(),
            user_id: "u1".to_string(),
            role: role.to_string(),
            center_id: center_id.map(str::to_string),
            exp: 0,
        }
    }

    #[test]
    fn own_center_is_authorized() {
        assert!(claims("teacher", Some("c1")).authorize_center("c1").is_ok());
    }

    #[test]
    fn cross_center_is_forbidden() {
        let err = claims("teacher", Some("c1"))
            .authorize_center("c2")
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn missing_center_claim_is_forbidden() {
        assert!(claims("teacher", None).authorize_center("c1").is_err());
    }

    #[test]
    fn admin_may_access_any_center() {
        assert!(claims("admin", None).authorize_center("c2").is_ok());
    }
}
