use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of the `signature` carried by email verification links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkClaims {
    pub sub: Uuid,    // user ID
    pub hash: String, // sha1 of the email the link was issued for
    pub iat: usize,   // issued at (unix timestamp)
    pub exp: usize,   // expires at (unix timestamp)
    pub iss: String,  // issuer
    pub aud: String,  // audience
}
