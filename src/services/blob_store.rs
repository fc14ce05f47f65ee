//! Filesystem-backed store mapping `ingestion_id -> UTF-8 text blob`.
//! One file per ingestion under a configured root; path layout is an
//! implementation detail not exposed past this module.

use uuid::Uuid;

use crate::errors::AppError;

fn path_for(root: &str, id: Uuid) -> std::path::PathBuf {
    std::path::Path::new(root).join(format!("{id}.txt"))
}

/// Persist (overwriting) the raw text for an ingestion.
pub async fn put(root: &str, id: Uuid, text: &str) -> Result<(), AppError> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| AppError::Internal(format!("failed to create blob store root: {e}")))?;
    tokio::fs::write(path_for(root, id), text)
        .await
        .map_err(|e| AppError::Internal(format!("failed to write blob: {e}")))
}

/// Read the raw text for an ingestion. Fails with `NotFound` if absent.
pub async fn get(root: &str, id: Uuid) -> Result<String, AppError> {
    tokio::fs::read_to_string(path_for(root, id))
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("blob for ingestion {id} not found"))
            }
            _ => AppError::Internal(format!("failed to read blob: {e}")),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let id = Uuid::new_v4();
        put(root, id, "hello world").await.unwrap();
        let text = get(root, id).await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn get_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let err = get(root, Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn put_overwrites_prior_text() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let id = Uuid::new_v4();
        put(root, id, "first").await.unwrap();
        put(root, id, "second").await.unwrap();
        assert_eq!(get(root, id).await.unwrap(), "second");
    }
}
