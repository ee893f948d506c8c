use bytes::Bytes;
use tracing::{error, info};
use uuid::Uuid;

use crate::staging::StagedFile;
use crate::storage::StorageClient;

/// Push a staged file to remote storage.
///
/// Returns the durable URL on success, `None` on failure. The staged file is
/// removed from local disk on every path out of this function.
pub async fn ingest(storage: &dyn StorageClient, staged: StagedFile) -> Option<String> {
    let bytes = match tokio::fs::read(staged.path()).await {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            error!(path = %staged.path().display(), error = %e, "read staged file failed");
            staged.discard().await;
            return None;
        }
    };

    let ext = ext_from_mime(staged.content_type()).unwrap_or("bin");
    let key = format!("media/{}.{}", Uuid::new_v4(), ext);
    let content_type = staged.content_type().to_string();

    let result = storage.upload(&key, bytes, &content_type).await;
    staged.discard().await;

    match result {
        Ok(url) => {
            info!(%key, "media uploaded");
            Some(url)
        }
        Err(e) => {
            error!(error = %e, %key, "media upload failed");
            None
        }
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    async fn stage_temp_file() -> StagedFile {
        let path = std::env::temp_dir().join(format!("{}-ingest.png", Uuid::new_v4()));
        tokio::fs::write(&path, b"fake image bytes").await.unwrap();
        StagedFile::new(path, "image/png")
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn ingest_returns_url_and_removes_local_file() {
        let state = AppState::fake();
        let staged = stage_temp_file().await;
        let path = staged.path().to_path_buf();

        let url = ingest(&*state.storage, staged).await.expect("upload ok");
        assert!(url.starts_with("https://fake.local/media/"));
        assert!(url.ends_with(".png"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn ingest_failure_still_removes_local_file() {
        use async_trait::async_trait;

        struct FailingStorage;
        #[async_trait]
        impl StorageClient for FailingStorage {
            async fn upload(
                &self,
                _key: &str,
                _body: Bytes,
                _content_type: &str,
            ) -> anyhow::Result<String> {
                anyhow::bail!("remote storage unavailable")
            }
        }

        let staged = stage_temp_file().await;
        let path = staged.path().to_path_buf();

        let url = ingest(&FailingStorage, staged).await;
        assert!(url.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn ingest_of_unreadable_path_returns_none() {
        let state = AppState::fake();
        let missing = std::env::temp_dir().join(format!("{}-missing.png", Uuid::new_v4()));
        let staged = StagedFile::new(missing, "image/png");

        assert!(ingest(&*state.storage, staged).await.is_none());
    }
}
