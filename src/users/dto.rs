use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::User;
use crate::storage::StorageClient;

/// Public view of a user. The password hash never leaves the server.
#[derive(Debug, Serialize)]
pub struct UserResource {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub profile_image: Option<String>, // URL
    #[serde(with = "time::serde::rfc3339::option")]
    pub email_verified_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserResource {
    pub async fn load(user: &User, storage: &dyn StorageClient) -> anyhow::Result<Self> {
        let profile_image = match &user.profile_image {
            Some(key) => Some(storage.public_url(key).await?),
            None => None,
        };
        Ok(Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            profile_image,
            email_verified_at: user.email_verified_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        })
    }
}

/// `data` payload of responses that return a user.
#[derive(Debug, Serialize)]
pub struct UserData {
    pub user: UserResource,
}

impl UserData {
    pub async fn load(user: &User, storage: &dyn StorageClient) -> anyhow::Result<Self> {
        Ok(Self {
            user: UserResource::load(user, storage).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    fn sample_user(profile_image: Option<&str>) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            username: "john_doe".into(),
            email: "john@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            email_verified_at: None,
            profile_image: profile_image.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn resource_hides_password_and_resolves_image_url() {
        let storage = LocalStorage::new("/tmp/unused", "http://localhost:8080");
        let user = sample_user(Some("profile_images/profile-1.png"));
        let data = UserData::load(&user, &storage).await.unwrap();

        let json = serde_json::to_value(&data).unwrap();
        let u = &json["user"];
        assert_eq!(u["username"], "john_doe");
        assert_eq!(
            u["profile_image"],
            "http://localhost:8080/storage/profile_images/profile-1.png"
        );
        assert!(u["email_verified_at"].is_null());
        assert!(u["created_at"].is_string());
        assert!(u.get("password_hash").is_none());
        assert!(!json.to_string().contains("argon2"));
    }

    #[tokio::test]
    async fn resource_without_image_is_null() {
        let storage = LocalStorage::new("/tmp/unused", "http://localhost:8080");
        let data = UserResource::load(&sample_user(None), &storage).await.unwrap();
        assert!(data.profile_image.is_none());
    }
}
