//! In-memory stores and a router harness for handler tests.

use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    app::build_app,
    auth::{
        links::LinkKeys,
        tokens::{StoredToken, TokenStore},
    },
    config::{AppConfig, LinkConfig, MailConfig, StorageConfig, UploadConfig},
    notify::Notifier,
    state::AppState,
    storage::{LocalStorage, StorageClient},
    users::{
        repo::UserRepo,
        repo_types::{NewUser, User},
    },
};

pub const APP_URL: &str = "http://localhost:8080";

#[derive(Default)]
pub struct MemoryUsers {
    rows: Mutex<HashMap<Uuid, User>>,
    fail_writes: Mutex<bool>,
}

impl MemoryUsers {
    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn by_username(&self, username: &str) -> Option<User> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(anyhow!("injected write failure"));
        }
        Ok(())
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut User)) -> anyhow::Result<User> {
        self.check_writable()?;
        let mut rows = self.rows.lock().unwrap();
        let user = rows.get_mut(&id).ok_or_else(|| anyhow!("no user {id}"))?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}

#[async_trait]
impl UserRepo for MemoryUsers {
    async fn create(&self, new: NewUser) -> anyhow::Result<User> {
        self.check_writable()?;
        let mut rows = self.rows.lock().unwrap();
        if rows
            .values()
            .any(|u| u.username == new.username || u.email == new.email)
        {
            return Err(anyhow!("unique constraint violated"));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            email_verified_at: None,
            profile_image: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        Ok(self.by_username(username))
    }

    async fn email_taken(&self, email: &str) -> anyhow::Result<bool> {
        Ok(self.rows.lock().unwrap().values().any(|u| u.email == email))
    }

    async fn username_taken(&self, username: &str) -> anyhow::Result<bool> {
        Ok(self.by_username(username).is_some())
    }

    async fn mark_email_verified(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<User> {
        self.update(id, |u| {
            u.email_verified_at.get_or_insert(at);
        })
    }

    async fn set_profile_image(&self, id: Uuid, key: &str) -> anyhow::Result<User> {
        self.update(id, |u| u.profile_image = Some(key.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryTokens {
    rows: Mutex<HashMap<Uuid, StoredToken>>,
}

impl MemoryTokens {
    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokens {
    async fn insert(&self, token: StoredToken) -> anyhow::Result<()> {
        self.rows.lock().unwrap().insert(token.id, token);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<StoredToken>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Link { email: String, url: String },
    Verified { email: String },
}

/// Records delivered notifications instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn last_link(&self) -> Option<String> {
        self.sent().into_iter().rev().find_map(|s| match s {
            Sent::Link { url, .. } => Some(url),
            Sent::Verified { .. } => None,
        })
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_verification_link(&self, user: &User, url: &str) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("injected mail failure"));
        }
        self.sent.lock().unwrap().push(Sent::Link {
            email: user.email.clone(),
            url: url.to_string(),
        });
        Ok(())
    }

    async fn email_verified(&self, user: &User) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(Sent::Verified {
            email: user.email.clone(),
        });
        Ok(())
    }
}

/// Local storage whose writes and deletes can be made to fail.
pub struct FailingStorage {
    inner: LocalStorage,
    fail_puts: Mutex<bool>,
    fail_deletes: Mutex<bool>,
}

impl FailingStorage {
    pub fn new(inner: LocalStorage) -> Self {
        Self {
            inner,
            fail_puts: Mutex::new(false),
            fail_deletes: Mutex::new(false),
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        *self.fail_puts.lock().unwrap() = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        *self.fail_deletes.lock().unwrap() = fail;
    }
}

#[async_trait]
impl StorageClient for FailingStorage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        if *self.fail_puts.lock().unwrap() {
            return Err(anyhow!("injected put failure"));
        }
        self.inner.put_object(key, body, content_type).await
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        if *self.fail_deletes.lock().unwrap() {
            return Err(anyhow!("injected delete failure"));
        }
        self.inner.delete_object(key).await
    }

    async fn public_url(&self, key: &str) -> anyhow::Result<String> {
        self.inner.public_url(key).await
    }
}

/// Encodes a blank `width`x`height` image.
pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut buf, format)
        .unwrap();
    Bytes::from(buf.into_inner())
}

pub struct TestApp {
    pub router: Router,
    pub users: Arc<MemoryUsers>,
    pub tokens: Arc<MemoryTokens>,
    pub notifier: Arc<RecordingNotifier>,
    pub storage: Arc<FailingStorage>,
    links: LinkKeys,
    storage_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let storage_dir = tempfile::tempdir().unwrap();
        let root = storage_dir.path().to_string_lossy().into_owned();
        let links = LinkConfig {
            secret: "test-link-secret".into(),
            issuer: "focusapp".into(),
            audience: "focusapp-verify".into(),
            ttl_minutes: 60,
        };
        let config = AppConfig {
            database_url: "postgres://unused".into(),
            app_url: APP_URL.into(),
            token_ttl_minutes: Some(60),
            links: links.clone(),
            resend_per_minute: 6,
            storage: StorageConfig::Local { root: root.clone() },
            mail: MailConfig {
                from: "Focus App <no-reply@focusapp.local>".into(),
                smtp: None,
            },
            uploads: UploadConfig::default(),
        };

        let users = Arc::new(MemoryUsers::default());
        let tokens = Arc::new(MemoryTokens::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let storage = Arc::new(FailingStorage::new(LocalStorage::new(root, APP_URL)));
        let state = AppState::from_parts(
            Arc::new(config),
            users.clone(),
            tokens.clone(),
            storage.clone(),
            notifier.clone(),
        );

        Self {
            router: build_app(state),
            users,
            tokens,
            notifier,
            storage,
            links: LinkKeys::new(&links),
            storage_dir,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    pub async fn call_raw(
        &self,
        method: Method,
        uri: &str,
        content_type: &str,
        body: Vec<u8>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let (status, bytes) = self.send(req.body(Body::from(body)).unwrap()).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        match body {
            Some(json) => {
                self.call_raw(method, uri, "application/json", json.to_string().into_bytes(), token)
                    .await
            }
            None => {
                let mut req = Request::builder().method(method).uri(uri);
                if let Some(token) = token {
                    req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
                }
                let (status, bytes) = self.send(req.body(Body::empty()).unwrap()).await;
                (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
            }
        }
    }

    /// Posts a single-file multipart form.
    pub async fn upload(
        &self,
        uri: &str,
        field: &str,
        filename: &str,
        file: &[u8],
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let boundary = "focusapp-test-boundary";
        let mut body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(file);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        self.call_raw(
            Method::POST,
            uri,
            &format!("multipart/form-data; boundary={boundary}"),
            body,
            token,
        )
        .await
    }

    pub async fn get_bytes(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(req).await
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/auth/register",
            Some(json!({
                "username": username,
                "email": email,
                "password": password,
                "password_confirmation": password,
            })),
            None,
        )
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/auth/login",
            Some(json!({ "username": username, "password": password })),
            None,
        )
        .await
    }

    pub async fn token_for(&self, username: &str, password: &str) -> String {
        let (status, body) = self.login(username, password).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["access_token"].as_str().unwrap().to_string()
    }

    /// Path and query of an absolute URL built from the app URL.
    pub fn path_of(&self, url: &str) -> String {
        url.strip_prefix(APP_URL).unwrap_or(url).to_string()
    }

    /// A correctly signed verification path for an arbitrary id/hash pair.
    pub fn signed_verify_path(&self, id: Uuid, hash: &str) -> String {
        let signature = self.links.sign(id, hash).unwrap();
        format!("/email/verify/{id}/{hash}?signature={signature}")
    }

    /// Every file written under the storage root.
    pub fn stored_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut files = Vec::new();
        walk(self.storage_dir.path(), &mut files);
        files.sort();
        files
    }
}
