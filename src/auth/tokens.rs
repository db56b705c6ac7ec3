//! Opaque bearer tokens.
//!
//! The client receives `"{id}|{secret}"`. Only the SHA-256 of the secret is
//! stored, so a leaked table cannot be replayed.

use anyhow::Context;
use async_trait::async_trait;
use constant_time_eq::constant_time_eq;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

const SECRET_LEN: usize = 40;
const TOKEN_NAME: &str = "auth_token";

#[derive(Debug, Clone, FromRow)]
pub struct StoredToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub token_hash: String,
    pub expires_at: Option<OffsetDateTime>,
}

impl StoredToken {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: StoredToken) -> anyhow::Result<()>;
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<StoredToken>>;
    /// Returns whether a row was removed.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Plaintext handed to the client once, at login.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub id: Uuid,
    pub plain: String,
}

pub async fn issue(
    store: &dyn TokenStore,
    user_id: Uuid,
    ttl_minutes: Option<i64>,
) -> anyhow::Result<IssuedToken> {
    let id = Uuid::new_v4();
    let secret: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect();
    let expires_at = ttl_minutes.map(|m| OffsetDateTime::now_utc() + Duration::minutes(m));

    store
        .insert(StoredToken {
            id,
            user_id,
            name: TOKEN_NAME.into(),
            token_hash: hash_secret(&secret),
            expires_at,
        })
        .await?;
    debug!(%user_id, token_id = %id, "access token issued");

    Ok(IssuedToken {
        id,
        plain: format!("{id}|{secret}"),
    })
}

/// Resolves a presented plaintext token. `None` for anything malformed,
/// unknown, mismatched or expired.
pub async fn authenticate(
    store: &dyn TokenStore,
    plain: &str,
) -> anyhow::Result<Option<StoredToken>> {
    let Some((id, secret)) = plain.split_once('|') else {
        return Ok(None);
    };
    let Ok(id) = Uuid::parse_str(id) else {
        return Ok(None);
    };
    let Some(token) = store.find(id).await? else {
        return Ok(None);
    };

    if !constant_time_eq(hash_secret(secret).as_bytes(), token.token_hash.as_bytes()) {
        return Ok(None);
    }
    if token.is_expired(OffsetDateTime::now_utc()) {
        debug!(token_id = %token.id, "access token expired");
        return Ok(None);
    }
    Ok(Some(token))
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

#[derive(Clone)]
pub struct PgTokenStore {
    db: PgPool,
}

impl PgTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: StoredToken) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO personal_access_tokens (id, user_id, name, token_hash, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.name)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .execute(&self.db)
        .await
        .context("insert access token")?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<StoredToken>> {
        let token = sqlx::query_as::<_, StoredToken>(
            r#"
            UPDATE personal_access_tokens
               SET last_used_at = now()
             WHERE id = $1
            RETURNING id, user_id, name, token_hash, expires_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find access token")?;
        Ok(token)
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM personal_access_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete access token")?;
        Ok(res.rows_affected() > 0)
    }
}
