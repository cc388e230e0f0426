use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use axum::extract::{multipart::Field, Multipart};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppError;

/// An uploaded file written to the local staging directory.
///
/// Consumers call [`StagedFile::discard`] once done with it. A value dropped
/// without that (a request failing validation after parsing) still removes
/// its file, so nothing is left behind.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    pub content_type: String,
    pub file_name: Option<String>,
    pub size: u64,
    removed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the local copy.
    pub async fn discard(mut self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "staged file removed");
                self.removed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.removed = true,
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to remove staged file"),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staged file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to remove staged file"),
        }
    }
}

/// Text fields and staged files of a multipart request.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, StagedFile>,
}

impl MultipartForm {
    /// Trimmed, non-empty text value.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn take_file(&mut self, name: &str) -> Option<StagedFile> {
        self.files.remove(name)
    }
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::bad_request(format!("Invalid multipart body: {}", e.body_text()))
}

async fn stage_field(mut field: Field<'_>, dir: &Path) -> Result<StagedFile, AppError> {
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".into());
    let file_name = field.file_name().map(str::to_string);

    let mut staged = StagedFile {
        path: dir.join(Uuid::new_v4().to_string()),
        content_type,
        file_name,
        size: 0,
        removed: false,
    };
    let mut out = tokio::fs::File::create(staged.path()).await.map_err(|e| {
        warn!(error = %e, dir = %dir.display(), "cannot create staged file");
        AppError::Internal("Could not store the uploaded file".into())
    })?;

    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        out.write_all(&chunk).await.map_err(|e| {
            warn!(error = %e, "write to staged file failed");
            AppError::Internal("Could not store the uploaded file".into())
        })?;
        staged.size += chunk.len() as u64;
    }
    out.flush()
        .await
        .map_err(|_| AppError::Internal("Could not store the uploaded file".into()))?;
    Ok(staged)
}

/// Reads a multipart body, staging file parts under `dir`.
///
/// Only file fields listed in `allowed_files` are accepted, one file each.
pub async fn read_form(
    mut mp: Multipart,
    dir: &Path,
    allowed_files: &[&str],
) -> Result<MultipartForm, AppError> {
    let mut form = MultipartForm::default();
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        let Some(file_name) = field.file_name() else {
            let value = field.text().await.map_err(bad_multipart)?;
            form.fields.insert(name, value);
            continue;
        };
        // browsers send an empty, nameless part for an untouched file input
        if file_name.is_empty() {
            continue;
        }
        if !allowed_files.contains(&name.as_str()) || form.files.contains_key(&name) {
            warn!(field = %name, "unexpected file field");
            return Err(AppError::bad_request(format!("Unexpected field: {name}")));
        }

        let staged = stage_field(field, dir).await?;
        if staged.size == 0 {
            staged.discard().await;
            continue;
        }
        debug!(field = %name, size = staged.size, "file staged");
        form.files.insert(name, staged);
    }
    Ok(form)
}
