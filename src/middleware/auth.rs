use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Roles allowed on the grading and authoring routes.
pub const STAFF_ROLES: [&str; 2] = ["admin", "trainer"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| Error::Unauthorized("token subject is not a user id".to_string()))
    }

    pub fn has_role(&self, allowed: &[&str]) -> bool {
        let role = self.role.as_deref().unwrap_or_default();
        allowed.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Signs a HS256 token for `user_id`. Used by tooling and tests.
pub fn issue_token(secret: &str, user_id: Uuid, role: Option<&str>, ttl: Duration) -> Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        role: role.map(str::to_string),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("token signing failed: {}", e)))
}

fn reject(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": code }))).into_response()
}

fn decode_bearer(headers: &HeaderMap, secret: &str) -> std::result::Result<Claims, &'static str> {
    let header = headers.get(AUTHORIZATION).ok_or("missing_authorization")?;
    let value = header.to_str().map_err(|_| "bad_authorization")?;
    let token = value.strip_prefix("Bearer ").ok_or("unsupported_scheme")?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|_| "invalid_token")
}

pub async fn require_bearer_auth(mut req: Request, next: Next) -> Response {
    let secret = &crate::config::get_config().jwt_secret;
    match decode_bearer(req.headers(), secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(code) => reject(StatusCode::UNAUTHORIZED, code),
    }
}

pub async fn require_staff(mut req: Request, next: Next) -> Response {
    let secret = &crate::config::get_config().jwt_secret;
    match decode_bearer(req.headers(), secret) {
        Ok(claims) if claims.has_role(&STAFF_ROLES) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Ok(claims) => {
            tracing::warn!(sub = %claims.sub, role = ?claims.role, "staff route denied");
            reject(StatusCode::FORBIDDEN, "forbidden")
        }
        Err(code) => reject(StatusCode::UNAUTHORIZED, code),
    }
}
