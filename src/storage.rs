use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Blob storage addressed by relative keys such as `documents/123-456.pdf`.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Bytes) -> Result<()>;

    /// `None` when nothing is stored under `key`.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Returns whether an object was actually removed.
    async fn delete_object(&self, key: &str) -> Result<bool>;

    async fn object_exists(&self, key: &str) -> Result<bool>;

    async fn list_objects(&self) -> Result<Vec<String>>;

    fn resolve(&self, key: &str) -> Result<PathBuf>;
}

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create upload root {}", self.root.display()))
    }
}

/// Rejects keys that could escape the storage root.
pub fn validate_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    if key.is_empty() {
        bail!("storage key must not be empty");
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!("storage key {key:?} is not a plain relative path"),
        }
    }
    Ok(path)
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(&self, key: &str, bytes: Bytes) -> Result<()> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&partial).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&partial, &target).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&partial).await;
            return Err(err).with_context(|| format!("failed to write {}", target.display()));
        }

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(key)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", target.display())),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<bool> {
        let target = self.resolve(key)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to delete {}", target.display())),
        }
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        let target = self.resolve(key)?;
        Ok(fs::try_exists(&target).await.unwrap_or(false))
    }

    async fn list_objects(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to list {}", dir.display()))
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_key(key)?))
    }
}
