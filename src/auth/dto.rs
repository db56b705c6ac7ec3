use serde::{Deserialize, Serialize};

use crate::users::dto::UserResource;

/// Request body for user registration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Request body for login.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `data` returned after a successful login.
#[derive(Debug, Serialize)]
pub struct LoginData {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: UserResource,
}

/// `signature` query parameter of verification links.
#[derive(Debug, Default, Deserialize)]
pub struct SignatureQuery {
    pub signature: Option<String>,
}
