use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use tracing::{debug, warn};
use uuid::Uuid;

/// A file written to local temp storage by the upload boundary.
///
/// Single-owner: the handle is consumed either by `media::ingest` or by
/// `discard`, so the staged file is deleted exactly once on every exit path.
pub struct StagedFile {
    path: PathBuf,
    content_type: String,
}

impl StagedFile {
    pub(crate) fn new(path: PathBuf, content_type: impl Into<String>) -> Self {
        Self {
            path,
            content_type: content_type.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Best-effort removal of the local file. Failures are logged, never escalated.
    pub async fn discard(self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "staged file removed"),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove staged file")
            }
        }
    }
}

/// Text fields and locally staged files collected from one multipart request.
pub struct StagedForm {
    values: HashMap<String, String>,
    files: HashMap<String, StagedFile>,
}

impl StagedForm {
    /// Drain a multipart stream, writing each file field to a unique path
    /// under `upload_dir`. If collection fails part-way, files already
    /// staged are discarded before the error propagates.
    pub async fn collect(mut mp: Multipart, upload_dir: &str) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(upload_dir).await?;

        let mut values = HashMap::new();
        let mut files: HashMap<String, StagedFile> = HashMap::new();

        loop {
            let field = match mp.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    discard_all(files.into_values().collect()).await;
                    return Err(e.into());
                }
            };
            let Some(name) = field.name().map(|s| s.to_string()) else {
                continue;
            };

            if let Some(file_name) = field.file_name().map(|s| s.to_string()) {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = match field.bytes().await {
                    Ok(data) => data,
                    Err(e) => {
                        discard_all(files.into_values().collect()).await;
                        return Err(e.into());
                    }
                };
                let path = Path::new(upload_dir)
                    .join(format!("{}-{}", Uuid::new_v4(), sanitize(&file_name)));
                if let Err(e) = tokio::fs::write(&path, &data).await {
                    discard_all(files.into_values().collect()).await;
                    return Err(e.into());
                }
                debug!(field = %name, path = %path.display(), "staged upload");
                files.insert(name, StagedFile::new(path, content_type));
            } else {
                match field.text().await {
                    Ok(text) => {
                        values.insert(name, text);
                    }
                    Err(e) => {
                        discard_all(files.into_values().collect()).await;
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(Self { values, files })
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn take_file(&mut self, name: &str) -> Option<StagedFile> {
        self.files.remove(name)
    }

    /// Discard every file still owned by the form.
    pub async fn discard_files(self) {
        discard_all(self.files.into_values().collect()).await;
    }
}

pub async fn discard_all(files: Vec<StagedFile>) {
    for file in files {
        file.discard().await;
    }
}

// Uploaded names land inside the staging dir; strip anything path-like.
fn sanitize(file_name: &str) -> String {
    file_name.replace(|c: char| c.is_whitespace() || c == '/' || c == '\\', "_")
}
