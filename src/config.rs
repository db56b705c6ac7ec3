use anyhow::Context;

/// Settings for the signed email-verification links.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Files on local disk, served back under `/storage`.
    Local { root: String },
    /// S3 / MinIO bucket, served back through presigned URLs.
    S3(S3Config),
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from: String,
    /// `None` writes mail to the log instead of sending it.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: String,
    pub max_kilobytes: usize,
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: "profile_images".into(),
            max_kilobytes: 2048,
            min_width: 100,
            min_height: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub app_url: String,
    /// Bearer token lifetime; `None` means tokens live until logout.
    pub token_ttl_minutes: Option<i64>,
    pub links: LinkConfig,
    pub resend_per_minute: u32,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub uploads: UploadConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let app_url = env_or("APP_URL", "http://localhost:8080")
            .trim_end_matches('/')
            .to_string();

        let token_ttl_minutes = match parse_or("TOKEN_TTL_MINUTES", 60 * 24 * 7) {
            0 => None,
            m => Some(m),
        };

        let links = LinkConfig {
            secret: std::env::var("LINK_SECRET").context("LINK_SECRET is not set")?,
            issuer: env_or("LINK_ISSUER", "focusapp"),
            audience: env_or("LINK_AUDIENCE", "focusapp-verify"),
            ttl_minutes: parse_or("VERIFY_LINK_TTL_MINUTES", 60),
        };

        let storage = match env_or("STORAGE_DRIVER", "local").as_str() {
            "local" => StorageConfig::Local {
                root: env_or("STORAGE_ROOT", "storage/app/public"),
            },
            "s3" => StorageConfig::S3(S3Config {
                endpoint: std::env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT is not set")?,
                bucket: std::env::var("MINIO_BUCKET").context("MINIO_BUCKET is not set")?,
                access_key: std::env::var("MINIO_ACCESS_KEY")
                    .context("MINIO_ACCESS_KEY is not set")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")
                    .context("MINIO_SECRET_KEY is not set")?,
                region: env_or("MINIO_REGION", "us-east-1"),
            }),
            other => anyhow::bail!("unknown STORAGE_DRIVER {other:?}"),
        };

        let smtp = match env_or("MAIL_DRIVER", "log").as_str() {
            "log" => None,
            "smtp" => Some(SmtpConfig {
                host: std::env::var("MAIL_HOST").context("MAIL_HOST is not set")?,
                port: parse_or("MAIL_PORT", 587),
                username: std::env::var("MAIL_USERNAME").ok(),
                password: std::env::var("MAIL_PASSWORD").ok(),
                tls: env_or("MAIL_TLS", "true") != "false",
            }),
            other => anyhow::bail!("unknown MAIL_DRIVER {other:?}"),
        };
        let mail = MailConfig {
            from: env_or("MAIL_FROM", "Focus App <no-reply@focusapp.local>"),
            smtp,
        };

        let uploads = UploadConfig {
            dir: env_or("PROFILE_IMAGE_DIR", "profile_images"),
            ..UploadConfig::default()
        };

        Ok(Self {
            database_url,
            app_url,
            token_ttl_minutes,
            links,
            resend_per_minute: parse_or("RESEND_PER_MINUTE", 6),
            storage,
            mail,
            uploads,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
