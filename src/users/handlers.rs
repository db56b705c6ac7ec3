use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Router,
};
use tracing::{instrument, warn};

use super::{
    dto::UserData,
    images::{self, replace_profile_image, FIELD},
};
use crate::{
    auth::extractors::AuthUser, error::ApiError, response::ApiResponse, state::AppState,
    validation::FieldErrors,
};

const PROFILE_FAILED: &str = "Failed to load user profile.";
const UPLOAD_FAILED: &str = "Profile image upload failed. Please try again.";

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/user", get(get_me))
}

pub fn image_routes() -> Router<AppState> {
    Router::new()
        .route("/user/profile-image", post(upload_profile_image))
        // larger than the image limit so oversized files get a field error, not a 413
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn get_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<UserData>, ApiError> {
    let data = UserData::load(&auth.user, state.storage.as_ref())
        .await
        .map_err(|e| ApiError::internal(PROFILE_FAILED, e))?;
    Ok(ApiResponse::ok("Successfully retrieved user profile", data))
}

#[instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn upload_profile_image(
    State(state): State<AppState>,
    auth: AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<UserData>, ApiError> {
    let mut mp = multipart.map_err(|e| {
        warn!(error = %e, "not a multipart request");
        upload_failed()
    })?;

    let mut body = None;
    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "malformed multipart body");
                return Err(upload_failed());
            }
        };
        if field.name() != Some(FIELD) {
            continue;
        }
        match field.bytes().await {
            Ok(bytes) => body = Some(bytes),
            Err(e) => {
                warn!(error = %e, "profile image field unreadable");
                return Err(upload_failed());
            }
        }
    }

    let image = images::validate(body, &state.config.uploads)?;
    let user = replace_profile_image(&state, &auth.user, image)
        .await
        .map_err(|e| ApiError::internal(UPLOAD_FAILED, e))?;
    let data = UserData::load(&user, state.storage.as_ref())
        .await
        .map_err(|e| ApiError::internal(UPLOAD_FAILED, e))?;

    Ok(ApiResponse::ok("Profile image uploaded successfully", data))
}

fn upload_failed() -> ApiError {
    let mut errors = FieldErrors::new();
    errors.add(FIELD, "The profile image failed to upload.");
    errors.into()
}
