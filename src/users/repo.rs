use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::users::repo_types::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique field (`username` or `email`) is already taken.
    #[error("duplicate {0}")]
    Duplicate(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Matches a user whose username equals `username` or whose email equals `email`.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>>;

    async fn create(&self, new: NewUser) -> StoreResult<User>;

    /// Overwrites only the refresh-token column. Returns `false` if no such user.
    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> StoreResult<bool>;

    /// Replaces the refresh token only while it still equals `current`.
    /// Returns `false` if another rotation or a logout got there first.
    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        next: &str,
    ) -> StoreResult<bool>;

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<bool>;

    /// Replaces `full_name`, and `email` when given.
    async fn update_details(
        &self,
        id: Uuid,
        full_name: &str,
        email: Option<&str>,
    ) -> StoreResult<Option<User>>;

    async fn set_avatar(&self, id: Uuid, url: &str) -> StoreResult<Option<User>>;

    async fn set_cover_image(&self, id: Uuid, url: &str) -> StoreResult<Option<User>>;
}

const USER_COLUMNS: &str = "id, username, email, full_name, avatar, cover_image, \
                            password_hash, refresh_token, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some(c) if c.contains("email") => "email",
                Some(c) if c.contains("username") => "username",
                _ => "username or email",
            };
            return StoreError::Duplicate(field.into());
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context("users query"))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)
    }

    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        if username.is_none() && email.is_none() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE ($1::text IS NOT NULL AND username = $1) \
                OR ($2::text IS NOT NULL AND email = $2) \
             LIMIT 1"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let sql = format!(
            "INSERT INTO users (id, username, email, full_name, avatar, cover_image, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.username)
            .bind(&new.email)
            .bind(&new.full_name)
            .bind(&new.avatar)
            .bind(&new.cover_image)
            .bind(&new.password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(map_sqlx)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await
            .map_err(map_sqlx)?;
        Ok(res.rows_affected() == 1)
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        next: &str,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET refresh_token = $3 WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id)
        .bind(current)
        .bind(next)
        .execute(&self.db)
        .await
        .map_err(map_sqlx)?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(hash)
        .execute(&self.db)
        .await
        .map_err(map_sqlx)?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_details(
        &self,
        id: Uuid,
        full_name: &str,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET full_name = $2, email = COALESCE($3, email), updated_at = now() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(full_name)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET avatar = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(url)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)
    }

    async fn set_cover_image(&self, id: Uuid, url: &str) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET cover_image = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(url)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)
    }
}
