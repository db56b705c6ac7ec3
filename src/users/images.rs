use std::io::Cursor;

use anyhow::Context;
use bytes::Bytes;
use image::{ImageFormat, ImageReader};
use tracing::{info, warn};
use uuid::Uuid;

use super::repo_types::User;
use crate::{config::UploadConfig, state::AppState, validation::FieldErrors};

pub const FIELD: &str = "profile_image";

/// An upload that passed validation.
#[derive(Debug)]
pub struct ProfileImage {
    pub body: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl ProfileImage {
    pub fn extension(&self) -> &'static str {
        ext_and_mime(self.format).map_or("bin", |(ext, _)| ext)
    }

    pub fn content_type(&self) -> &'static str {
        ext_and_mime(self.format).map_or("application/octet-stream", |(_, mime)| mime)
    }
}

/// Checks an uploaded `profile_image`: present, an image, within the size
/// limit and at least the minimum dimensions.
pub fn validate(body: Option<Bytes>, rules: &UploadConfig) -> Result<ProfileImage, FieldErrors> {
    let mut errors = FieldErrors::new();

    let Some(body) = body.filter(|b| !b.is_empty()) else {
        errors.add(FIELD, "The profile image field is required.");
        return Err(errors);
    };

    if body.len() > rules.max_kilobytes * 1024 {
        errors.add(
            FIELD,
            format!(
                "The profile image field must not be greater than {} kilobytes.",
                rules.max_kilobytes
            ),
        );
    }

    let format = image::guess_format(&body)
        .ok()
        .filter(|f| ext_and_mime(*f).is_some());
    let dimensions = format.and_then(|f| {
        ImageReader::with_format(Cursor::new(&body[..]), f)
            .into_dimensions()
            .ok()
    });

    let (Some(format), Some((width, height))) = (format, dimensions) else {
        errors.add(FIELD, "The profile image field must be an image.");
        return Err(errors);
    };

    if width < rules.min_width || height < rules.min_height {
        errors.add(FIELD, "The profile image field has invalid image dimensions.");
    }

    errors.into_result().map(|()| ProfileImage {
        body,
        format,
        width,
        height,
    })
}

/// Replaces the user's profile image: drop the old file (best effort),
/// store the new one, then point the user record at it.
pub async fn replace_profile_image(
    st: &AppState,
    user: &User,
    image: ProfileImage,
) -> anyhow::Result<User> {
    if let Some(old) = &user.profile_image {
        match st.storage.delete_object(old).await {
            Ok(()) => info!(user_id = %user.id, key = %old, "old profile image deleted"),
            Err(e) => warn!(
                error = ?e,
                user_id = %user.id,
                key = %old,
                "old profile image not deleted"
            ),
        }
    }

    let key = format!(
        "{}/profile-{}.{}",
        st.config.uploads.dir.trim_end_matches('/'),
        Uuid::new_v4(),
        image.extension()
    );
    let content_type = image.content_type();
    let ProfileImage {
        body,
        width,
        height,
        ..
    } = image;
    st.storage
        .put_object(&key, body, content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    let user = st
        .users
        .set_profile_image(user.id, &key)
        .await
        .context("persist profile image")?;
    info!(user_id = %user.id, %key, width, height, "profile image stored");
    Ok(user)
}

fn ext_and_mime(format: ImageFormat) -> Option<(&'static str, &'static str)> {
    match format {
        ImageFormat::Jpeg => Some(("jpg", "image/jpeg")),
        ImageFormat::Png => Some(("png", "image/png")),
        ImageFormat::Gif => Some(("gif", "image/gif")),
        ImageFormat::Bmp => Some(("bmp", "image/bmp")),
        ImageFormat::WebP => Some(("webp", "image/webp")),
        _ => None,
    }
}
