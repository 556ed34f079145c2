//! File lifecycle on top of [`ObjectStorage`].
//!
//! A stored file belongs to the row that references its key. New files are
//! always placed before the row points at them, and a superseded file is only
//! removed once the row has moved on, so a committed row never references a
//! missing file.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::error::{AppError, AppResult};
use crate::storage::ObjectStorage;

pub const OCTET_STREAM: &str = "application/octet-stream";

const DOCUMENT_TYPES: &[(&str, &[&str])] = &[
    ("application/pdf", &["pdf"]),
    ("application/msword", &["doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &["docx"],
    ),
];

const IMAGE_TYPES: &[(&str, &[&str])] = &[
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Document,
    ProfileImage,
}

impl UploadKind {
    fn prefix(self) -> &'static str {
        match self {
            UploadKind::Document => "documents",
            UploadKind::ProfileImage => "images",
        }
    }

    fn allowed_types(self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            UploadKind::Document => DOCUMENT_TYPES,
            UploadKind::ProfileImage => IMAGE_TYPES,
        }
    }

    fn rejection(self) -> &'static str {
        match self {
            UploadKind::Document => "invalid file type, only PDF and Word documents are allowed",
            UploadKind::ProfileImage => "invalid image type, only PNG, JPEG, GIF and WEBP are allowed",
        }
    }
}

/// A file received from a client, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct FileManager {
    storage: Arc<dyn ObjectStorage>,
    max_upload_bytes: usize,
}

impl FileManager {
    pub fn new(storage: Arc<dyn ObjectStorage>, max_upload_bytes: usize) -> Self {
        Self {
            storage,
            max_upload_bytes,
        }
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Checks type and size, returning the extension the stored file will get.
    pub fn validate(&self, kind: UploadKind, upload: &Upload) -> AppResult<&'static str> {
        if upload.bytes.is_empty() {
            return Err(AppError::bad_request("file must not be empty"));
        }

        let content_type = upload
            .content_type
            .as_deref()
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let (_, extensions) = kind
            .allowed_types()
            .iter()
            .find(|(mime, _)| *mime == content_type)
            .ok_or_else(|| AppError::bad_request(kind.rejection()))?;

        if upload.bytes.len() > self.max_upload_bytes {
            return Err(AppError::payload_too_large(format!(
                "file must not exceed {} MB",
                self.max_upload_bytes / (1024 * 1024)
            )));
        }

        let original_ext = extension_of(&upload.original_name);
        let ext = extensions
            .iter()
            .find(|candidate| Some(**candidate) == original_ext.as_deref())
            .unwrap_or(&extensions[0]);
        Ok(ext)
    }

    /// Validates and writes the upload, returning its relative key.
    pub async fn store(&self, kind: UploadKind, upload: Upload) -> AppResult<String> {
        let ext = self.validate(kind, &upload)?;
        let key = generate_key(kind, ext);

        self.storage
            .put_object(&key, upload.bytes)
            .await
            .map_err(|err| {
                error!(error = %err, key = %key, "failed to store file");
                AppError::internal_with("failed to store file", err)
            })?;

        debug!(key = %key, original_name = %upload.original_name, "stored file");
        Ok(key)
    }

    /// Stores the upload and hands its key to `commit`; if the commit fails
    /// the freshly stored file is removed again.
    pub async fn store_then<T, F>(&self, kind: UploadKind, upload: Upload, commit: F) -> AppResult<T>
    where
        F: FnOnce(&str) -> AppResult<T> + Send,
        T: Send,
    {
        self.replace(kind, None, upload, commit).await
    }

    /// New file first, then `commit`, then best-effort removal of `old`.
    /// On a failed commit the new file is removed and `old` is left alone.
    pub async fn replace<T, F>(
        &self,
        kind: UploadKind,
        old: Option<&str>,
        upload: Upload,
        commit: F,
    ) -> AppResult<T>
    where
        F: FnOnce(&str) -> AppResult<T> + Send,
        T: Send,
    {
        let new_key = self.store(kind, upload).await?;

        match commit(&new_key) {
            Ok(value) => {
                if let Some(old_key) = old.filter(|old_key| *old_key != new_key) {
                    self.delete(old_key).await;
                }
                Ok(value)
            }
            Err(err) => {
                warn!(key = %new_key, error = %err, "commit failed, removing stored file");
                self.delete(&new_key).await;
                Err(err)
            }
        }
    }

    /// Best-effort removal. A file that is already gone is not an error.
    pub async fn delete(&self, key: &str) {
        match self.storage.delete_object(key).await {
            Ok(true) => debug!(key = %key, "deleted stored file"),
            Ok(false) => debug!(key = %key, "stored file already absent"),
            Err(err) => warn!(key = %key, error = %err, "failed to delete stored file"),
        }
    }

    pub fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        self.storage
            .resolve(key)
            .map_err(|err| AppError::bad_request(err.to_string()))
    }

    pub async fn exists(&self, key: &str) -> AppResult<bool> {
        self.resolve(key)?;
        Ok(self.storage.object_exists(key).await?)
    }

    pub async fn read(&self, key: &str) -> AppResult<Vec<u8>> {
        self.resolve(key)?;
        self.storage
            .get_object(key)
            .await?
            .ok_or_else(|| AppError::not_found_with("file does not exist"))
    }
}

pub fn content_type_of(path: &str) -> &'static str {
    let Some(ext) = extension_of(path) else {
        return OCTET_STREAM;
    };
    DOCUMENT_TYPES
        .iter()
        .chain(IMAGE_TYPES.iter())
        .find(|(_, extensions)| extensions.contains(&ext.as_str()))
        .map(|(mime, _)| *mime)
        .unwrap_or(OCTET_STREAM)
}

pub fn extension_of(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn generate_key(kind: UploadKind, ext: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{}/{millis}-{suffix:09}.{ext}", kind.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use tempfile::TempDir;

    const PDF: &str = "application/pdf";

    fn manager() -> (TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()));
        (dir, FileManager::new(storage, 1024))
    }

    fn upload(name: &str, content_type: &str, bytes: &[u8]) -> Upload {
        Upload {
            original_name: name.to_string(),
            content_type: Some(content_type.to_string()),
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    async fn stored_keys(files: &FileManager) -> Vec<String> {
        files.storage().list_objects().await.unwrap()
    }

    #[tokio::test]
    async fn store_places_file_under_kind_prefix() {
        let (_dir, files) = manager();
        let key = files
            .store(UploadKind::Document, upload("paper.PDF", PDF, b"%PDF"))
            .await
            .unwrap();

        assert!(key.starts_with("documents/"));
        assert!(key.ends_with(".pdf"));
        assert!(files.resolve(&key).unwrap().exists());
        assert_eq!(files.read(&key).await.unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn extension_falls_back_to_content_type() {
        let (_dir, files) = manager();
        let key = files
            .store(
                UploadKind::Document,
                upload("thesis", "application/msword", b"doc"),
            )
            .await
            .unwrap();
        assert!(key.ends_with(".doc"));
    }

    #[tokio::test]
    async fn rejects_disallowed_type_without_writing() {
        let (_dir, files) = manager();
        let err = files
            .store(UploadKind::Document, upload("notes.txt", "text/plain", b"hi"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(stored_keys(&files).await.is_empty());
    }

    #[tokio::test]
    async fn rejects_oversized_upload_without_writing() {
        let (_dir, files) = manager();
        let err = files
            .store(UploadKind::Document, upload("big.pdf", PDF, &[0u8; 1025]))
            .await
            .unwrap_err();
        assert!(err.message().contains("must not exceed"));
        assert!(stored_keys(&files).await.is_empty());
    }

    #[tokio::test]
    async fn image_policy_differs_from_document_policy() {
        let (_dir, files) = manager();
        assert!(files
            .validate(UploadKind::ProfileImage, &upload("a.pdf", PDF, b"x"))
            .is_err());
        assert_eq!(
            files
                .validate(UploadKind::ProfileImage, &upload("me.JPEG", "image/jpeg", b"x"))
                .unwrap(),
            "jpeg"
        );
    }

    #[tokio::test]
    async fn replace_removes_old_only_after_commit() {
        let (_dir, files) = manager();
        let old = files
            .store(UploadKind::Document, upload("v1.pdf", PDF, b"one"))
            .await
            .unwrap();

        let new = files
            .replace(
                UploadKind::Document,
                Some(&old),
                upload("v2.pdf", PDF, b"two"),
                |key| Ok(key.to_string()),
            )
            .await
            .unwrap();

        assert_ne!(old, new);
        assert!(!files.exists(&old).await.unwrap());
        assert!(files.exists(&new).await.unwrap());
        assert_eq!(stored_keys(&files).await, vec![new]);
    }

    #[tokio::test]
    async fn failed_commit_keeps_old_and_drops_new() {
        let (_dir, files) = manager();
        let old = files
            .store(UploadKind::Document, upload("v1.pdf", PDF, b"one"))
            .await
            .unwrap();

        let result: AppResult<()> = files
            .replace(
                UploadKind::Document,
                Some(&old),
                upload("v2.pdf", PDF, b"two"),
                |_| Err(AppError::internal("insert failed")),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(stored_keys(&files).await, vec![old]);
    }

    #[tokio::test]
    async fn store_then_compensates_on_failure() {
        let (_dir, files) = manager();
        let result: AppResult<()> = files
            .store_then(UploadKind::Document, upload("a.pdf", PDF, b"x"), |_| {
                Err(AppError::bad_request("nope"))
            })
            .await;
        assert!(result.is_err());
        assert!(stored_keys(&files).await.is_empty());
    }

    struct FailingStorage;

    #[async_trait]
    impl ObjectStorage for FailingStorage {
        async fn put_object(&self, _key: &str, _bytes: Bytes) -> anyhow::Result<()> {
            Err(anyhow!("disk full"))
        }

        async fn get_object(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn delete_object(&self, _key: &str) -> anyhow::Result<bool> {
            Err(anyhow!("read-only"))
        }

        async fn object_exists(&self, _key: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn list_objects(&self) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
            Ok(PathBuf::from(key))
        }
    }

    #[tokio::test]
    async fn storage_failure_aborts_before_commit() {
        let files = FileManager::new(Arc::new(FailingStorage), 1024);
        let mut committed = false;
        let result = files
            .store_then(UploadKind::Document, upload("a.pdf", PDF, b"x"), |_| {
                committed = true;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!committed);
    }

    #[tokio::test]
    async fn delete_swallows_storage_errors() {
        let files = FileManager::new(Arc::new(FailingStorage), 1024);
        files.delete("documents/x.pdf").await;
    }

    #[test]
    fn content_type_table() {
        assert_eq!(content_type_of("documents/1-2.pdf"), "application/pdf");
        assert_eq!(content_type_of("a.DOC"), "application/msword");
        assert_eq!(
            content_type_of("a.docx"),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(content_type_of("images/a.jpg"), "image/jpeg");
        assert_eq!(content_type_of("a.exe"), OCTET_STREAM);
        assert_eq!(content_type_of("noext"), OCTET_STREAM);
    }

    #[test]
    fn generated_keys_are_distinct() {
        let first = generate_key(UploadKind::Document, "pdf");
        let second = generate_key(UploadKind::Document, "pdf");
        assert_ne!(first, second);
    }
}
