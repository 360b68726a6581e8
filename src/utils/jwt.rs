// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{auth, config::Config, error::AppError, state::AppState};

/// Distinguishes student and admin tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Student,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - stringified user id.
    pub sub: String,
    /// Token id; for students this is matched against the single-device key.
    pub jti: String,
    pub token_type: TokenType,
    pub user_id: i32,
    /// Student only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<i32>,
    /// Admin only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_id: Option<i32>,
    /// Admin only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    /// Issued-at as Unix timestamp.
    pub iat: usize,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions
            .as_ref()
            .is_some_and(|perms| perms.iter().any(|p| p == code))
    }
}

fn now_unix() -> Result<usize, AppError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .as_secs() as usize)
}

pub fn sign_student_token(
    config: &Config,
    student_id: i32,
    class_id: i32,
    jti: &str,
) -> Result<String, AppError> {
    let iat = now_unix()?;
    let claims = Claims {
        sub: student_id.to_string(),
        jti: jti.to_owned(),
        token_type: TokenType::Student,
        user_id: student_id,
        class_id: Some(class_id),
        role_id: None,
        permissions: None,
        iat,
        exp: iat + (config.jwt_expiry_hours * 3600) as usize,
    };
    sign(config, &claims)
}

pub fn sign_admin_token(
    config: &Config,
    admin_id: i32,
    role_id: i32,
    permissions: Vec<String>,
    jti: &str,
) -> Result<String, AppError> {
    let iat = now_unix()?;
    let claims = Claims {
        sub: admin_id.to_string(),
        jti: jti.to_owned(),
        token_type: TokenType::Admin,
        user_id: admin_id,
        class_id: None,
        role_id: Some(role_id),
        permissions: Some(permissions),
        iat,
        exp: iat + (config.jwt_expiry_hours * 3600) as usize,
    };
    sign(config, &claims)
}

fn sign(config: &Config, claims: &Claims) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

/// Validates signature and expiry, returning the claims.
pub fn verify_token(config: &Config, token: &str) -> Result<Claims, AppError> {
    let token_data = decode(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::TokenInvalid)?;

    Ok(token_data.claims)
}

fn bearer_token(req: &Request) -> Option<String> {
    let header = req.headers().get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim().to_string())
    } else {
        None
    }
}

/// Fallback for EventSource clients, which cannot set headers.
fn query_token(req: &Request) -> Option<String> {
    req.uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(str::to_string)
}

/// Middleware guarding student routes. Validates the JWT, requires the
/// student token type, then checks the JTI against the single-device key in
/// Redis; a token superseded by a newer login is rejected here.
pub async fn student_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req).ok_or(AppError::TokenRequired)?;
    let claims = verify_token(&state.config, &token)?;

    if claims.token_type != TokenType::Student {
        return Err(AppError::StudentAccessOnly);
    }

    let mut redis = state.redis.clone();
    auth::validate_student_session(&mut redis, claims.user_id, &claims.jti).await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Middleware guarding admin routes. Accepts the token from the
/// Authorization header or, for SSE, from the `token` query parameter.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .or_else(|| query_token(&req))
        .ok_or(AppError::TokenRequired)?;
    let claims = verify_token(&state.config, &token)?;

    if claims.token_type != TokenType::Admin {
        return Err(AppError::AdminAccessOnly);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            server_port: 0,
            database_url: String::new(),
            max_db_conns: 1,
            redis_url: String::new(),
            jwt_secret: "test_secret_for_unit_tests".to_string(),
            jwt_expiry_hours: 1,
            allowed_origins: vec![],
            rust_log: "error".to_string(),
        }
    }

    #[test]
    fn student_token_roundtrip() {
        let config = test_config();
        let token = sign_student_token(&config, 42, 7, "jti-1").unwrap();
        let claims = verify_token(&config, &token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.class_id, Some(7));
        assert_eq!(claims.jti, "jti-1");
        assert_eq!(claims.token_type, TokenType::Student);
        assert!(claims.permissions.is_none());
    }

    #[test]
    fn admin_token_carries_permissions() {
        let config = test_config();
        let token =
            sign_admin_token(&config, 1, 2, vec!["exams:write".to_string()], "jti-2").unwrap();
        let claims = verify_token(&config, &token).unwrap();
        assert_eq!(claims.token_type, TokenType::Admin);
        assert!(claims.has_permission("exams:write"));
        assert!(!claims.has_permission("students:write"));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let config = test_config();
        let token = sign_student_token(&config, 42, 7, "jti-1").unwrap();

        let mut other = test_config();
        other.jwt_secret = "a_different_secret".to_string();
        assert!(matches!(
            verify_token(&other, &token),
            Err(AppError::TokenInvalid)
        ));
    }
}
