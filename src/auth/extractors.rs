use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;
use uuid::Uuid;

use super::tokens;
use crate::{error::ApiError, state::AppState, users::repo_types::User};

/// Resolves the bearer token of the request to its user.
pub struct AuthUser {
    pub user: User,
    /// Token that authenticated this request.
    pub token_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Read Authorization header
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthenticated)?;

        // Expect "Bearer <token>"
        let plain = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthenticated)?;

        let token = tokens::authenticate(state.tokens.as_ref(), plain.trim())
            .await
            .map_err(|e| ApiError::internal("Authentication failed.", e))?
            .ok_or_else(|| {
                warn!("invalid or expired token");
                ApiError::Unauthenticated
            })?;

        let user = state
            .users
            .find_by_id(token.user_id)
            .await
            .map_err(|e| ApiError::internal("Authentication failed.", e))?
            .ok_or_else(|| {
                warn!(user_id = %token.user_id, "token owner not found");
                ApiError::Unauthenticated
            })?;

        Ok(AuthUser {
            user,
            token_id: token.id,
        })
    }
}
