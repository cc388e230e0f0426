#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, Response, StatusCode},
    Router,
};
use bytes::Bytes;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use userbase::{
    auth::Argon2Hasher,
    config::{AppConfig, JwtConfig, MediaConfig, PasswordConfig},
    storage::StorageClient,
    users::MemoryUserStore,
    AppState,
};

pub const MEDIA_BASE: &str = "https://media.test";

/// Object store double that records every call.
#[derive(Default)]
pub struct FakeStorage {
    pub puts: Mutex<Vec<String>>,
    pub deletes: Mutex<Vec<String>>,
    pub fail_puts: AtomicBool,
    /// 1-based index of the single `put_object` call to fail. 0 fails none.
    pub fail_nth_put: AtomicUsize,
    pub fail_deletes: AtomicBool,
    put_calls: AtomicUsize,
}

impl FakeStorage {
    pub fn put_keys(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, key: &str, _body: Bytes, _ct: &str) -> anyhow::Result<()> {
        let call = self.put_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_puts.load(Ordering::SeqCst) || self.fail_nth_put.load(Ordering::SeqCst) == call {
            anyhow::bail!("media host unreachable");
        }
        self.puts.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("delete refused");
        }
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryUserStore>,
    pub storage: Arc<FakeStorage>,
    pub upload_dir: TempDir,
}

fn test_config(upload_dir: &TempDir) -> AppConfig {
    AppConfig {
        database_url: String::new(),
        database_max_connections: 1,
        host: "127.0.0.1".into(),
        port: 0,
        cookie_secure: true,
        jwt: JwtConfig {
            access_secret: "test-access-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 15,
            refresh_ttl_minutes: 60,
        },
        media: MediaConfig {
            endpoint: "fake".into(),
            bucket: "fake".into(),
            access_key: "fake".into(),
            secret_key: "fake".into(),
            region: "us-east-1".into(),
            public_url: MEDIA_BASE.into(),
            upload_dir: upload_dir.path().to_path_buf(),
            max_upload_bytes: 1024 * 1024,
        },
        password: PasswordConfig::default(),
    }
}

impl TestApp {
    pub fn new() -> Self {
        let upload_dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryUserStore::new());
        let storage = Arc::new(FakeStorage::default());
        let hasher = Argon2Hasher::with_params(64, 1, 1).expect("cheap argon2 params");
        let state = AppState::from_parts(
            store.clone(),
            Arc::new(test_config(&upload_dir)),
            storage.clone(),
            Arc::new(hasher),
        );
        Self {
            router: userbase::build_app(state.clone()),
            state,
            store,
            storage,
            upload_dir,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.expect("router is infallible")
    }

    pub async fn post_json(&self, path: &str, body: Value, access: Option<&str>) -> Response<Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = access {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(req.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: Multipart,
        access: Option<&str>,
    ) -> Response<Body> {
        let (content_type, body) = form.finish();
        let mut req = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, content_type);
        if let Some(token) = access {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(req.body(Body::from(body)).unwrap()).await
    }

    pub async fn register(&self, username: &str, email: &str, password: &str) -> Response<Body> {
        let form = Multipart::new()
            .text("fullName", "Ann Lee")
            .text("email", email)
            .text("username", username)
            .text("password", password)
            .file("avatar", "avatar.png", "image/png", b"\x89PNG avatar");
        self.post_multipart("/api/v1/users/register", form, None).await
    }

    /// Registers and logs in, returning `(access, refresh)`.
    pub async fn signed_in(&self, username: &str, password: &str) -> (String, String) {
        let email = format!("{username}@x.com");
        let res = self.register(username, &email, password).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        self.login(username, password).await
    }

    pub async fn login(&self, username: &str, password: &str) -> (String, String) {
        let res = self
            .post_json(
                "/api/v1/users/login",
                serde_json::json!({ "username": username, "password": password }),
                None,
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = json(res).await;
        (
            body["data"]["accessToken"].as_str().unwrap().to_string(),
            body["data"]["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.upload_dir.path()).unwrap().count()
    }
}

pub async fn json(res: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// All `Set-Cookie` headers of a response.
pub fn set_cookies(res: &Response<Body>) -> Vec<String> {
    res.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Value of the cookie `name` set by the response, if any.
pub fn cookie_value(res: &Response<Body>, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    set_cookies(res).into_iter().find_map(|c| {
        c.strip_prefix(&prefix)
            .map(|rest| rest.split(';').next().unwrap_or_default().to_string())
    })
}

/// Minimal `multipart/form-data` encoder.
pub struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    pub fn new() -> Self {
        Self {
            boundary: "----userbase-test-boundary".into(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }
}
