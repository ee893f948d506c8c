use sqlx::PgPool;
use uuid::Uuid;

use crate::users::repo_types::{ChannelProfile, User};

const USER_COLUMNS: &str = "id, username, email, fullname, password_hash, refresh_token, avatar_url, cover_image_url, created_at";

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub fullname: &'a str,
    pub password_hash: &'a str,
    pub avatar_url: &'a str,
    pub cover_image_url: Option<&'a str>,
}

impl User {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE id = $1
            "#,
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Find a user by email, username, or either.
    pub async fn find_by_email_or_username(
        db: &PgPool,
        email: Option<&str>,
        username: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NOT NULL AND email = $1)
               OR ($2::text IS NOT NULL AND username = $2)
            "#,
        ))
        .bind(email)
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user. Unique indexes on username and email backstop the
    /// caller's duplicate pre-check against concurrent registrations.
    pub async fn create(db: &PgPool, new: NewUser<'_>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, fullname, password_hash, avatar_url, cover_image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(new.username)
        .bind(new.email)
        .bind(new.fullname)
        .bind(new.password_hash)
        .bind(new.avatar_url)
        .bind(new.cover_image_url)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Overwrite (or clear, with `None`) the stored refresh token.
    /// Returns false if no such user exists.
    pub async fn set_refresh_token(
        db: &PgPool,
        id: Uuid,
        token: Option<&str>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $1
            WHERE id = $2
            "#,
        )
        .bind(token)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the stored refresh token only if `current` still matches it.
    /// Returns false when the stored value has already moved on (rotation
    /// replay, logout, or a vanished user).
    pub async fn swap_refresh_token(
        db: &PgPool,
        id: Uuid,
        current: &str,
        next: &str,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token = $1
            WHERE id = $2 AND refresh_token = $3
            "#,
        )
        .bind(next)
        .bind(id)
        .bind(current)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $1
            WHERE id = $2
            "#,
        )
        .bind(password_hash)
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_details(
        db: &PgPool,
        id: Uuid,
        fullname: &str,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET fullname = $1, email = $2
            WHERE id = $3
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(fullname)
        .bind(email)
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn set_avatar_url(db: &PgPool, id: Uuid, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET avatar_url = $1
            WHERE id = $2
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(url)
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn set_cover_image_url(
        db: &PgPool,
        id: Uuid,
        url: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET cover_image_url = $1
            WHERE id = $2
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(url)
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Aggregate a channel view for `username`: subscriber edge counts plus
    /// whether `viewer` (if any) subscribes to the channel. An anonymous
    /// viewer always reads `is_subscribed = false`.
    pub async fn channel_profile(
        db: &PgPool,
        username: &str,
        viewer: Option<Uuid>,
    ) -> anyhow::Result<Option<ChannelProfile>> {
        let profile = sqlx::query_as::<_, ChannelProfile>(
            r#"
            SELECT u.id,
                   u.username,
                   u.fullname,
                   u.email,
                   u.avatar_url,
                   u.cover_image_url,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id)
                       AS subscribers_count,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id)
                       AS channels_subscribed_to_count,
                   EXISTS(
                       SELECT 1 FROM subscriptions s
                       WHERE s.channel_id = u.id AND s.subscriber_id = $2::uuid
                   ) AS is_subscribed
            FROM users u
            WHERE u.username = $1
            "#,
        )
        .bind(username)
        .bind(viewer)
        .fetch_optional(db)
        .await?;
        Ok(profile)
    }
}

/// True when an error coming out of a repo call is a Postgres unique-index
/// violation (duplicate username or email).
pub fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}
