use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::staging::StagedFile;
use crate::state::AppState;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub key: String,
    pub url: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

fn object_key(content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("users/{}.{}", Uuid::new_v4(), ext)
}

fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Object key addressed by `url`, if it points into our bucket.
fn key_from_url<'a>(base: &str, url: &'a str) -> Option<&'a str> {
    url.strip_prefix(base.trim_end_matches('/'))?
        .strip_prefix('/')
        .filter(|k| !k.is_empty())
}

async fn try_upload(st: &AppState, file: &StagedFile) -> anyhow::Result<UploadedMedia> {
    let body = tokio::fs::read(file.path())
        .await
        .with_context(|| format!("read staged file {}", file.path().display()))?;
    let key = object_key(&file.content_type);
    st.storage
        .put_object(&key, Bytes::from(body), &file.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    let url = public_url(&st.config.media.public_url, &key);
    Ok(UploadedMedia { key, url })
}

/// Pushes a staged file to the media host.
///
/// Returns `None` on any transport failure; callers decide whether that is
/// fatal. The local copy is removed either way.
pub async fn upload(st: &AppState, file: StagedFile) -> Option<UploadedMedia> {
    let file_name = file.file_name.as_deref().unwrap_or("-");
    let uploaded = match try_upload(st, &file).await {
        Ok(media) => {
            info!(key = %media.key, file_name, size = file.size, "media uploaded");
            Some(media)
        }
        Err(e) => {
            warn!(error = ?e, file_name, "media upload failed");
            None
        }
    };
    file.discard().await;
    uploaded
}

/// Best-effort delete of a previously uploaded asset. Never fails the caller.
pub async fn remove(st: &AppState, url: &str) {
    let Some(key) = key_from_url(&st.config.media.public_url, url) else {
        warn!(%url, "not a managed media url; skipping delete");
        return;
    };
    match st.storage.delete_object(key).await {
        Ok(()) => info!(%key, "old media deleted"),
        Err(e) => warn!(error = ?e, %key, "old media delete failed"),
    }
}
