use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{LoginData, LoginRequest, RegisterRequest, SignatureQuery},
    extractors::AuthUser,
    links::hash_matches,
    password::{hash_password, verify_against_dummy, verify_password},
    services::{send_verification, validate_login, validate_registration},
    tokens,
};
use crate::{
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    users::{dto::UserData, dto::UserResource, repo_types::NewUser},
};

const REGISTER_FAILED: &str = "Registration failed. Please try again.";
const LOGIN_FAILED: &str = "Login failed. Please try again.";
const LOGOUT_FAILED: &str = "Logout failed. Please try again.";
const RESEND_FAILED: &str = "Failed to resend verification email";
const VERIFY_FAILED: &str = "Email verification failed. Please try again.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn verification_routes() -> Router<AppState> {
    Router::new()
        .route("/email/verify/:id/:hash", get(verify_email))
        .route("/email/verification-notification", get(resend_verification))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<ApiResponse<UserData>, ApiError> {
    let Json(mut payload) = payload?;

    if let Err(errors) = validate_registration(state.users.as_ref(), &mut payload)
        .await
        .map_err(|e| ApiError::internal(REGISTER_FAILED, e))?
    {
        warn!(fields = ?errors, "registration rejected");
        return Err(errors.into());
    }

    let password_hash =
        hash_password(&payload.password).map_err(|e| ApiError::internal(REGISTER_FAILED, e))?;

    let user = state
        .users
        .create(NewUser {
            username: payload.username,
            email: payload.email,
            password_hash,
        })
        .await
        .map_err(|e| ApiError::internal(REGISTER_FAILED, e))?;
    info!(user_id = %user.id, email = %user.email, "user registered");

    let data = UserData::load(&user, state.storage.as_ref())
        .await
        .map_err(|e| ApiError::internal(REGISTER_FAILED, e))?;

    match send_verification(&state, &user).await {
        Ok(()) => Ok(ApiResponse::ok(
            "Registration successful! Please check your email for verification",
            data,
        )),
        Err(e) => {
            error!(error = ?e, user_id = %user.id, "verification email dispatch failed");
            Ok(ApiResponse::with_status(
                StatusCode::CREATED,
                "User created but email verification failed to send.",
                data,
            ))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginData>, ApiError> {
    let Json(mut payload) = payload?;
    validate_login(&mut payload)?;

    let user = match state.users.find_by_username(&payload.username).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            verify_against_dummy(&payload.password);
            warn!(username = %payload.username, "login unknown username");
            return Err(ApiError::InvalidCredentials);
        }
        Err(e) => return Err(ApiError::internal(LOGIN_FAILED, e)),
    };

    let ok = verify_password(&payload.password, &user.password_hash)
        .map_err(|e| ApiError::internal(LOGIN_FAILED, e))?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let token = tokens::issue(state.tokens.as_ref(), user.id, state.config.token_ttl_minutes)
        .await
        .map_err(|e| ApiError::internal(LOGIN_FAILED, e))?;
    let user_resource = UserResource::load(&user, state.storage.as_ref())
        .await
        .map_err(|e| ApiError::internal(LOGIN_FAILED, e))?;

    info!(user_id = %user.id, token_id = %token.id, "user logged in");
    Ok(ApiResponse::ok(
        "Login successful",
        LoginData {
            access_token: token.plain,
            token_type: "Bearer",
            user: user_resource,
        },
    ))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<Map<String, Value>>, ApiError> {
    state
        .tokens
        .delete(auth.token_id)
        .await
        .map_err(|e| ApiError::internal(LOGOUT_FAILED, e))?;

    info!(token_id = %auth.token_id, "user logged out");
    Ok(ApiResponse::message("Logout successful"))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn resend_verification(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<Map<String, Value>>, ApiError> {
    state.resend_throttle.check(auth.user.id)?;

    if auth.user.has_verified_email() {
        return Err(ApiError::AlreadyVerified);
    }

    send_verification(&state, &auth.user)
        .await
        .map_err(|e| ApiError::internal(RESEND_FAILED, e))?;

    info!("verification email resent");
    Ok(ApiResponse::message("Verification email sent"))
}

#[instrument(skip(state, query, hash))]
pub async fn verify_email(
    State(state): State<AppState>,
    Path((id, hash)): Path<(String, String)>,
    Query(query): Query<SignatureQuery>,
) -> Result<ApiResponse<Map<String, Value>>, ApiError> {
    let signed = query
        .signature
        .as_deref()
        .is_some_and(|sig| state.links.verify_for(sig, &id, &hash));
    if !signed {
        warn!("verification link with bad signature");
        return Err(ApiError::InvalidSignature);
    }

    let id = Uuid::parse_str(&id).map_err(|_| ApiError::NotFound)?;
    let user = state
        .users
        .find_by_id(id)
        .await
        .map_err(|e| ApiError::internal(VERIFY_FAILED, e))?
        .ok_or(ApiError::NotFound)?;

    if user.has_verified_email() {
        return Ok(ApiResponse::message("Email already verified"));
    }

    if !hash_matches(&user.email, &hash) {
        warn!(user_id = %user.id, "verification hash mismatch");
        return Err(ApiError::InvalidLink);
    }

    let user = state
        .users
        .mark_email_verified(user.id, OffsetDateTime::now_utc())
        .await
        .map_err(|e| ApiError::internal(VERIFY_FAILED, e))?;
    info!(user_id = %user.id, "email verified");

    if let Err(e) = state.notifier.email_verified(&user).await {
        error!(error = ?e, user_id = %user.id, "verified notification failed");
    }

    Ok(ApiResponse::message("Email verified successfully"))
}
