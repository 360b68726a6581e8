// src/auth.rs
//
// Single-device session guard. At most one JTI is valid per student; issuing
// a token records it in Redis under login:{student_id} with the same TTL as
// the JWT, and every authenticated request re-checks the stored value.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::{cache_keys, config::Config, error::AppError, utils::jwt};

/// Issues a student token, enforcing the single-device invariant.
///
/// Fails with SessionAlreadyActive when a login key already exists. The
/// check-then-set is not linearizable against a concurrent reset; the
/// middlewares re-validate the JTI on every request, so a racing loser is
/// kicked on its next call rather than at login.
pub async fn issue_student_token(
    redis: &mut ConnectionManager,
    config: &Config,
    student_id: i32,
    class_id: i32,
) -> Result<String, AppError> {
    let session_key = cache_keys::student_login(student_id);

    let existing: Option<String> = redis.get(&session_key).await?;
    if existing.is_some() {
        return Err(AppError::SessionAlreadyActive);
    }

    let jti = Uuid::new_v4().to_string();
    let token = jwt::sign_student_token(config, student_id, class_id, &jti)?;

    redis
        .set_ex::<_, _, ()>(&session_key, &jti, config.jwt_expiry_hours * 3600)
        .await?;

    Ok(token)
}

/// Issues an admin token with the role's permission codes embedded.
/// Admins are not bound to a single device.
pub fn issue_admin_token(
    config: &Config,
    admin_id: i32,
    role_id: i32,
    permissions: Vec<String>,
) -> Result<String, AppError> {
    let jti = Uuid::new_v4().to_string();
    jwt::sign_admin_token(config, admin_id, role_id, permissions, &jti)
}

/// Checks that the token's JTI still matches the stored single-device key.
pub async fn validate_student_session(
    redis: &mut ConnectionManager,
    student_id: i32,
    jti: &str,
) -> Result<(), AppError> {
    let session_key = cache_keys::student_login(student_id);
    let stored: Option<String> = redis.get(&session_key).await?;

    match stored {
        Some(active) if active == jti => Ok(()),
        _ => Err(AppError::SessionInvalidated),
    }
}

/// Removes the single-device key, allowing a fresh login.
pub async fn reset_student_session(
    redis: &mut ConnectionManager,
    student_id: i32,
) -> Result<(), AppError> {
    let session_key = cache_keys::student_login(student_id);
    redis.del::<_, ()>(&session_key).await?;
    Ok(())
}
