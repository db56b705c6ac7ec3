use anyhow::Context;

use super::{
    dto::{LoginRequest, RegisterRequest},
    password::MIN_PASSWORD_LEN,
};
use crate::{
    state::AppState,
    users::{repo::UserRepo, repo_types::User},
    validation::{is_valid_email, is_valid_username, required, FieldErrors},
};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const EMAIL_MAX: usize = 255;

/// Normalizes `req` in place and checks every registration rule, uniqueness
/// included. Store failures surface as `Err` on the outer result.
pub async fn validate_registration(
    users: &dyn UserRepo,
    req: &mut RegisterRequest,
) -> anyhow::Result<Result<(), FieldErrors>> {
    req.username = req.username.trim().to_string();
    req.email = req.email.trim().to_lowercase();

    let mut errors = FieldErrors::new();

    if required(&mut errors, "username", &req.username) {
        let len = req.username.chars().count();
        if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
            errors.add(
                "username",
                format!(
                    "The username field must be between {} and {} characters.",
                    USERNAME_MIN, USERNAME_MAX
                ),
            );
        } else if !is_valid_username(&req.username) {
            errors.add(
                "username",
                "The username field may only contain letters, numbers, dashes, \
                 underscores and dots.",
            );
        } else if users.username_taken(&req.username).await.context("check username")? {
            errors.add("username", "The username has already been taken.");
        }
    }

    if required(&mut errors, "email", &req.email) {
        if req.email.len() > EMAIL_MAX {
            errors.add(
                "email",
                format!("The email field must not be greater than {EMAIL_MAX} characters."),
            );
        } else if !is_valid_email(&req.email) {
            errors.add("email", "The email field must be a valid email address.");
        } else if users.email_taken(&req.email).await.context("check email")? {
            errors.add("email", "The email has already been taken.");
        }
    }

    if required(&mut errors, "password", &req.password) {
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            errors.add(
                "password",
                format!("The password field must be at least {MIN_PASSWORD_LEN} characters."),
            );
        }
        if req.password != req.password_confirmation {
            errors.add("password", "The password field confirmation does not match.");
        }
    }

    Ok(errors.into_result())
}

pub fn validate_login(req: &mut LoginRequest) -> Result<(), FieldErrors> {
    req.username = req.username.trim().to_string();

    let mut errors = FieldErrors::new();
    required(&mut errors, "username", &req.username);
    required(&mut errors, "password", &req.password);
    errors.into_result()
}

/// Builds a fresh signed link for `user` and hands it to the notifier.
pub async fn send_verification(st: &AppState, user: &User) -> anyhow::Result<()> {
    let url = st
        .links
        .verification_url(&st.config.app_url, user)
        .context("sign verification link")?;
    st.notifier
        .send_verification_link(user, &url)
        .await
        .context("dispatch verification link")
}
