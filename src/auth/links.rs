use std::time::Duration;

use constant_time_eq::constant_time_eq;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sha1::{Digest, Sha1};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::LinkClaims;
use crate::{config::LinkConfig, users::repo_types::User};

/// Lowercase hex SHA-1 of the address, the `{hash}` segment of a verification link.
pub fn email_hash(email: &str) -> String {
    hex::encode(Sha1::digest(email.as_bytes()))
}

/// Exact, constant-time match of a presented hash against the user's email hash.
pub fn hash_matches(email: &str, presented: &str) -> bool {
    constant_time_eq(email_hash(email).as_bytes(), presented.as_bytes())
}

/// Signs and checks the `signature` query parameter of verification links.
#[derive(Clone)]
pub struct LinkKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl LinkKeys {
    pub fn new(cfg: &LinkConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn sign(&self, user_id: Uuid, hash: &str) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = LinkClaims {
            sub: user_id,
            hash: hash.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "verification link signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<LinkClaims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.leeway = 0;
        let data = decode::<LinkClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Whether `token` is a live signature for exactly this `id`/`hash` pair.
    pub fn verify_for(&self, token: &str, id: &str, hash: &str) -> bool {
        match self.verify(token) {
            Ok(claims) => claims.sub.to_string() == id && claims.hash == hash,
            Err(e) => {
                debug!(error = %e, "verification link signature rejected");
                false
            }
        }
    }

    /// Absolute, signed verification URL for `user`.
    pub fn verification_url(&self, app_url: &str, user: &User) -> anyhow::Result<String> {
        let hash = email_hash(&user.email);
        let signature = self.sign(user.id, &hash)?;
        Ok(format!(
            "{}/email/verify/{}/{}?signature={}",
            app_url.trim_end_matches('/'),
            user.id,
            hash,
            signature
        ))
    }
}
