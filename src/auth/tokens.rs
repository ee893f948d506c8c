use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::jwt::JwtKeys;
use crate::error::ApiError;
use crate::users::repo_types::User;

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Sign a fresh access/refresh pair and persist the refresh token on the
/// user row, overwriting any prior value. One active refresh token per user.
pub async fn issue_pair(db: &PgPool, keys: &JwtKeys, user_id: Uuid) -> Result<TokenPair, ApiError> {
    let access_token = keys
        .sign_access(user_id)
        .map_err(|e| token_error(user_id, e))?;
    let refresh_token = keys
        .sign_refresh(user_id)
        .map_err(|e| token_error(user_id, e))?;

    let saved = User::set_refresh_token(db, user_id, Some(&refresh_token))
        .await
        .map_err(|e| token_error(user_id, e))?;
    if !saved {
        return Err(ApiError::Persistence("Error generating tokens".into()));
    }

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Exchange a presented refresh token for a new pair.
///
/// The swap is a single conditional update: the new refresh token replaces
/// the stored one only if the presented token still matches it. A stale
/// token (already rotated, or cleared by logout) swaps nothing and is
/// reported as reuse, never silently retried.
pub async fn rotate(db: &PgPool, keys: &JwtKeys, presented: &str) -> Result<TokenPair, ApiError> {
    let claims = keys
        .verify_refresh(presented)
        .map_err(|_| ApiError::Unauthenticated("Invalid refresh token".into()))?;

    let access_token = keys
        .sign_access(claims.sub)
        .map_err(|e| token_error(claims.sub, e))?;
    let refresh_token = keys
        .sign_refresh(claims.sub)
        .map_err(|e| token_error(claims.sub, e))?;

    let swapped = User::swap_refresh_token(db, claims.sub, presented, &refresh_token)
        .await
        .map_err(|e| token_error(claims.sub, e))?;
    if !swapped {
        warn!(user_id = %claims.sub, "refresh token reuse detected");
        return Err(ApiError::TokenReuseOrExpired);
    }

    info!(user_id = %claims.sub, "refresh token rotated");
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Clear the stored refresh token, invalidating every outstanding refresh
/// token for the user.
pub async fn invalidate(db: &PgPool, user_id: Uuid) -> Result<(), ApiError> {
    User::set_refresh_token(db, user_id, None)
        .await
        .map_err(|e| token_error(user_id, e))?;
    Ok(())
}

fn token_error(user_id: Uuid, e: impl std::fmt::Display) -> ApiError {
    error!(user_id = %user_id, error = %e, "token persistence error");
    ApiError::Persistence("Error generating tokens".into())
}
