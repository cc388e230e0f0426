use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// S3-compatible bucket that serves uploaded avatars and cover images.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL under which stored objects are publicly reachable.
    pub public_url: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

/// Argon2 cost parameters. `None` keeps the argon2 crate defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: Option<u32>,
    pub iterations: Option<u32>,
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub cookie_secure: bool,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
    pub password: PasswordConfig,
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("missing environment variable {key}"))
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            access_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_secret: required("REFRESH_TOKEN_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "userbase".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "userbase-clients".into()),
            access_ttl_minutes: parsed("ACCESS_TOKEN_TTL_MINUTES").unwrap_or(15),
            refresh_ttl_minutes: parsed("REFRESH_TOKEN_TTL_MINUTES").unwrap_or(60 * 24 * 10),
        };
        if jwt.access_secret == jwt.refresh_secret {
            tracing::warn!("access and refresh tokens share the same signing secret");
        }

        let media = MediaConfig {
            endpoint: required("MEDIA_ENDPOINT")?,
            bucket: required("MEDIA_BUCKET")?,
            access_key: required("MEDIA_ACCESS_KEY")?,
            secret_key: required("MEDIA_SECRET_KEY")?,
            region: std::env::var("MEDIA_REGION").unwrap_or_else(|_| "us-east-1".into()),
            public_url: required("MEDIA_PUBLIC_URL")?
                .trim_end_matches('/')
                .to_string(),
            upload_dir: std::env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "./public/temp".into())
                .into(),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES").unwrap_or(20 * 1024 * 1024),
        };

        let password = PasswordConfig {
            memory_kib: parsed("PASSWORD_HASH_MEMORY_KIB"),
            iterations: parsed("PASSWORD_HASH_ITERATIONS"),
            parallelism: parsed("PASSWORD_HASH_PARALLELISM"),
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parsed("APP_PORT").unwrap_or(8000),
            cookie_secure: parsed("COOKIE_SECURE").unwrap_or(true),
            jwt,
            media,
            password,
        })
    }
}
