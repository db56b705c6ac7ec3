use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, User};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn email_taken(&self, email: &str) -> anyhow::Result<bool>;
    async fn username_taken(&self, username: &str) -> anyhow::Result<bool>;
    /// Sets `email_verified_at` unless already set. Returns the stored row.
    async fn mark_email_verified(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<User>;
    async fn set_profile_image(&self, id: Uuid, key: &str) -> anyhow::Result<User>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, email_verified_at, \
                            profile_image, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let sql = format!(
            "INSERT INTO users (username, email, password_hash) \
             VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .fetch_one(&self.db)
            .await
            .context("insert user")
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.db)
            .await
            .context("find user by username")
    }

    async fn email_taken(&self, email: &str) -> anyhow::Result<bool> {
        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.db)
            .await
            .context("check email")?;
        Ok(taken)
    }

    async fn username_taken(&self, username: &str) -> anyhow::Result<bool> {
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.db)
                .await
                .context("check username")?;
        Ok(taken)
    }

    async fn mark_email_verified(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<User> {
        let sql = format!(
            "UPDATE users \
                SET email_verified_at = COALESCE(email_verified_at, $2), updated_at = now() \
              WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(at)
            .fetch_one(&self.db)
            .await
            .context("mark email verified")
    }

    async fn set_profile_image(&self, id: Uuid, key: &str) -> anyhow::Result<User> {
        let sql = format!(
            "UPDATE users SET profile_image = $2, updated_at = now() \
              WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(key)
            .fetch_one(&self.db)
            .await
            .context("update profile image")
    }
}
