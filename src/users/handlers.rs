use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use lazy_static::lazy_static;
use regex::Regex;
use time::Duration as TimeDuration;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        jwt::{AuthUser, JwtKeys, OptionalAuthUser, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
        password, tokens,
        tokens::TokenPair,
    },
    error::ApiError,
    media,
    response::ApiResponse,
    staging::StagedForm,
    state::AppState,
    users::{
        dto::{
            ChangePasswordRequest, LoginData, LoginRequest, RefreshData, RefreshRequest,
            UpdateAccountRequest,
        },
        repo::{self, NewUser},
        repo_types::{ChannelProfile, PublicUser, User},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/change-password", post(change_password))
        .route("/me", get(current_user))
        .route("/account", patch(update_account))
        .route("/avatar", patch(update_avatar))
        .route("/cover-image", patch(update_cover_image))
        .route("/channel/:username", get(channel_profile))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn auth_cookie(name: &'static str, value: String, ttl: std::time::Duration) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_same_site(SameSite::None);
    cookie.set_path("/");
    cookie.set_max_age(TimeDuration::seconds(ttl.as_secs() as i64));
    cookie
}

fn set_auth_cookies(jar: CookieJar, pair: &TokenPair, keys: &JwtKeys) -> CookieJar {
    jar.add(auth_cookie(
        ACCESS_TOKEN_COOKIE,
        pair.access_token.clone(),
        keys.access_ttl,
    ))
    .add(auth_cookie(
        REFRESH_TOKEN_COOKIE,
        pair.refresh_token.clone(),
        keys.refresh_ttl,
    ))
}

fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    // Removal cookies must carry the same path they were set with.
    let mut access = Cookie::from(ACCESS_TOKEN_COOKIE);
    access.set_path("/");
    let mut refresh = Cookie::from(REFRESH_TOKEN_COOKIE);
    refresh.set_path("/");
    jar.remove(access).remove(refresh)
}

fn persistence(e: anyhow::Error) -> ApiError {
    error!(error = %e, "database error");
    ApiError::Persistence("Database error".into())
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let mut form = StagedForm::collect(mp, &state.config.upload_dir)
        .await
        .map_err(|e| {
            error!(error = %e, "multipart staging failed");
            ApiError::BadRequest("Malformed multipart body".into())
        })?;

    let fullname = form.value("fullname").unwrap_or_default().trim().to_string();
    let email = form.value("email").unwrap_or_default().trim().to_lowercase();
    let username = form
        .value("username")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let password = form.value("password").unwrap_or_default().to_string();

    if fullname.is_empty() || email.is_empty() || username.is_empty() || password.trim().is_empty()
    {
        form.discard_files().await;
        return Err(ApiError::BadRequest("All fields are required".into()));
    }
    if !is_valid_email(&email) {
        form.discard_files().await;
        return Err(ApiError::BadRequest("Invalid email".into()));
    }

    match User::find_by_email_or_username(&state.db, Some(&email), Some(&username)).await {
        Ok(None) => {}
        Ok(Some(_)) => {
            warn!(%email, %username, "registration for existing identity");
            form.discard_files().await;
            return Err(ApiError::Conflict(
                "User with email or username already exists".into(),
            ));
        }
        Err(e) => {
            form.discard_files().await;
            return Err(persistence(e));
        }
    }

    let Some(avatar) = form.take_file("avatar") else {
        form.discard_files().await;
        return Err(ApiError::BadRequest("Avatar file is required".into()));
    };
    let cover = form.take_file("coverImage");

    let avatar_url = match media::ingest(&*state.storage, avatar).await {
        Some(url) => url,
        None => {
            // ingest consumed the avatar's local file; the cover is still ours.
            if let Some(cover) = cover {
                cover.discard().await;
            }
            return Err(ApiError::BadRequest("Avatar upload failed".into()));
        }
    };

    // A failed cover upload is tolerated: the user registers without one.
    let cover_image_url = match cover {
        Some(file) => media::ingest(&*state.storage, file).await,
        None => None,
    };

    let password_hash = password::hash_password(&password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        ApiError::Persistence("Could not create user".into())
    })?;

    let user = User::create(
        &state.db,
        NewUser {
            username: &username,
            email: &email,
            fullname: &fullname,
            password_hash: &password_hash,
            avatar_url: &avatar_url,
            cover_image_url: cover_image_url.as_deref(),
        },
    )
    .await
    .map_err(|e| {
        if repo::is_unique_violation(&e) {
            ApiError::Conflict("User with email or username already exists".into())
        } else {
            error!(error = %e, "create user failed");
            ApiError::Persistence("Could not create user".into())
        }
    })?;

    info!(user_id = %user.id, %username, "user registered");
    Ok(ApiResponse::created(
        PublicUser::from(user),
        "User registered successfully",
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<LoginData>), ApiError> {
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    let username = payload
        .username
        .as_deref()
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());

    if email.is_none() && username.is_none() {
        return Err(ApiError::BadRequest("Email or username is required".into()));
    }

    let user = User::find_by_email_or_username(&state.db, email.as_deref(), username.as_deref())
        .await
        .map_err(persistence)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let ok = password::verify_password(&payload.password, &user.password_hash).map_err(|e| {
        error!(error = %e, "verify_password failed");
        ApiError::Persistence("Database error".into())
    })?;
    if !ok {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::InvalidCredential);
    }

    let keys = JwtKeys::from_ref(&state);
    let pair = tokens::issue_pair(&state.db, &keys, user.id).await?;
    let jar = set_auth_cookies(jar, &pair, &keys);

    info!(user_id = %user.id, "user logged in");
    Ok((
        jar,
        ApiResponse::ok(
            LoginData {
                user: PublicUser::from(user),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "Login successful",
        ),
    ))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<serde_json::Value>), ApiError> {
    tokens::invalidate(&state.db, user_id).await?;
    info!(%user_id, "user logged out");
    Ok((
        clear_auth_cookies(jar),
        ApiResponse::ok(serde_json::json!({}), "User logged out successfully"),
    ))
}

#[instrument(skip(state, jar, body))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<RefreshData>), ApiError> {
    let presented = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));
    let Some(presented) = presented else {
        return Err(ApiError::Unauthenticated("Unauthorized request".into()));
    };

    let keys = JwtKeys::from_ref(&state);
    let pair = tokens::rotate(&state.db, &keys, &presented).await?;
    let jar = set_auth_cookies(jar, &pair, &keys);

    Ok((
        jar,
        ApiResponse::ok(
            RefreshData {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "Access token refreshed",
        ),
    ))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await
        .map_err(persistence)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let ok = password::verify_password(&payload.old_password, &user.password_hash).map_err(|e| {
        error!(error = %e, "verify_password failed");
        ApiError::Persistence("Database error".into())
    })?;
    if !ok {
        return Err(ApiError::InvalidCredential);
    }

    let new_hash = password::hash_password(&payload.new_password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        ApiError::Persistence("Could not change password".into())
    })?;
    User::update_password(&state.db, user_id, &new_hash)
        .await
        .map_err(persistence)?;

    // Existing sessions stay valid: no token re-issuance here.
    info!(%user_id, "password changed");
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Password changed successfully",
    ))
}

#[instrument(skip(state))]
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await
        .map_err(persistence)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Current user fetched successfully",
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let fullname = payload
        .fullname
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    let (Some(fullname), Some(email)) = (fullname, email) else {
        return Err(ApiError::BadRequest("Fullname and email are required".into()));
    };
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }

    let user = User::update_details(&state.db, user_id, fullname, &email)
        .await
        .map_err(|e| {
            if repo::is_unique_violation(&e) {
                ApiError::Conflict("Email already in use".into())
            } else {
                persistence(e)
            }
        })?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    info!(%user_id, "account details updated");
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Details updated successfully",
    ))
}

#[instrument(skip(state, mp))]
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let url = ingest_single(&state, mp, "avatar").await?;
    let user = User::set_avatar_url(&state.db, user_id, &url)
        .await
        .map_err(persistence)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    info!(%user_id, "avatar updated");
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Avatar updated successfully",
    ))
}

#[instrument(skip(state, mp))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    let url = ingest_single(&state, mp, "coverImage").await?;
    let user = User::set_cover_image_url(&state.db, user_id, &url)
        .await
        .map_err(persistence)?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    info!(%user_id, "cover image updated");
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Cover image updated successfully",
    ))
}

/// Stage exactly one named file from the request and push it to remote
/// storage. Staged files are cleaned up on every failure path here, same as
/// in registration.
async fn ingest_single(state: &AppState, mp: Multipart, field: &str) -> Result<String, ApiError> {
    let mut form = StagedForm::collect(mp, &state.config.upload_dir)
        .await
        .map_err(|e| {
            error!(error = %e, "multipart staging failed");
            ApiError::BadRequest("Malformed multipart body".into())
        })?;

    let Some(file) = form.take_file(field) else {
        form.discard_files().await;
        return Err(ApiError::BadRequest(format!("{field} file is required")));
    };
    form.discard_files().await;

    media::ingest(&*state.storage, file)
        .await
        .ok_or_else(|| ApiError::BadRequest(format!("{field} upload failed")))
}

#[instrument(skip(state))]
pub async fn channel_profile(
    State(state): State<AppState>,
    OptionalAuthUser(viewer): OptionalAuthUser,
    Path(username): Path<String>,
) -> Result<ApiResponse<ChannelProfile>, ApiError> {
    let username = username.trim().to_lowercase();
    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".into()));
    }

    let profile = User::channel_profile(&state.db, &username, viewer)
        .await
        .map_err(persistence)?
        .ok_or_else(|| ApiError::NotFound("Channel does not exist".into()))?;

    Ok(ApiResponse::ok(
        profile,
        "User channel fetched successfully",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_cookie_attributes() {
        let cookie = auth_cookie(
            ACCESS_TOKEN_COOKIE,
            "token-value".into(),
            std::time::Duration::from_secs(300),
        );
        assert_eq!(cookie.name(), "accessToken");
        assert_eq!(cookie.value(), "token-value");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(TimeDuration::seconds(300)));
    }

    #[tokio::test]
    async fn set_auth_cookies_adds_both_tokens() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let pair = TokenPair {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
        };
        let jar = set_auth_cookies(CookieJar::new(), &pair, &keys);
        assert_eq!(jar.get(ACCESS_TOKEN_COOKIE).unwrap().value(), "access");
        assert_eq!(jar.get(REFRESH_TOKEN_COOKIE).unwrap().value(), "refresh");
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("a b@example.com"));
    }
}
