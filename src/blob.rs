//! Blob storage for raw uploads.
//!
//! The pipeline stores the original file before parsing so a document row
//! always points at a resolvable URI. [`FsBlobStore`] writes under a local
//! root and hands out either `file://` URIs or `{public_base_url}/{key}`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

/// Object storage used for raw uploads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return a resolvable URI.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String>;

    /// Delete the object behind a URI previously returned by [`BlobStore::put`].
    /// Deleting a missing object is not an error.
    async fn delete(&self, uri: &str) -> Result<()>;
}

/// Replace every character outside `[a-zA-Z0-9.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Key for a new upload: `{user}/{unix_millis}-{random}-{sanitized file name}`.
///
/// The random part keeps same-name uploads in the same millisecond apart.
pub fn blob_key(user_id: &str, file_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    blob_key_at(user_id, file_name, Utc::now().timestamp_millis(), &suffix)
}

fn blob_key_at(user_id: &str, file_name: &str, millis: i64, suffix: &str) -> String {
    format!(
        "{}/{}-{}-{}",
        sanitize_file_name(user_id),
        millis,
        suffix,
        sanitize_file_name(file_name)
    )
}

/// Filesystem-backed [`BlobStore`].
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for_key(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            bail!("invalid blob key: {key}");
        }
        Ok(self.root.join(key))
    }

    fn uri_for(&self, key: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("file://{}", path.display()),
        }
    }

    fn path_for_uri(&self, uri: &str) -> Result<PathBuf> {
        if let Some(base) = &self.public_base_url {
            if let Some(key) = uri.strip_prefix(base.as_str()) {
                return self.path_for_key(key.trim_start_matches('/'));
            }
        }
        match uri.strip_prefix("file://") {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.starts_with(&self.root) {
                    bail!("blob {uri} is outside the storage root");
                }
                Ok(path)
            }
            None => bail!("unrecognized blob URI: {uri}"),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        let path = self.path_for_key(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write blob {}", path.display()))?;
        Ok(self.uri_for(key, &path))
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let path = self.path_for_uri(uri)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete blob {}", path.display())),
        }
    }
}
