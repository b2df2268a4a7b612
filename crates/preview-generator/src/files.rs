//! Local artifact store.

use async_trait::async_trait;
use chrono::Utc;
use preview_core::{ArtifactRef, ArtifactStore, Error, ResourceId, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Component, Path};
use std::sync::LazyLock;
use tracing::debug;

// `./` not preceded by another dot
static CURRENT_DIR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|[^.])\./").unwrap());

/// Remove `./` segments from a copied path while keeping `../`.
pub fn normalize_copied_path(path: &str) -> String {
    let mut current = path.to_string();
    // Adjacent matches share a character, so repeat until stable.
    loop {
        let next = CURRENT_DIR_REGEX.replace_all(&current, "$1").to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Registers files that already exist on local disk.
#[derive(Debug, Default, Clone)]
pub struct LocalArtifactStore;

impl LocalArtifactStore {
    pub fn new() -> Self {
        Self
    }
}

fn relative_to(base: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(base).unwrap_or(file);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn register(&self, base: &Path, file: &Path) -> Result<ArtifactRef> {
        let bytes = match tokio::fs::read(file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CouldNotWriteFile(format!(
                    "File: {} does not exist",
                    file.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let checksum = hex::encode(Sha256::digest(&bytes));
        debug!(path = %file.display(), size = bytes.len(), "Registered artifact");

        Ok(ArtifactRef {
            id: ResourceId::new(),
            path: file.to_path_buf(),
            relative_path: relative_to(base, file),
            checksum,
            size: bytes.len() as u64,
            created_at: Utc::now(),
        })
    }

    async fn delete(&self, reference: &ArtifactRef) -> Result<()> {
        match tokio::fs::remove_file(&reference.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_copied_path() {
        assert_eq!(normalize_copied_path("/site/./css/a.css"), "/site/css/a.css");
        assert_eq!(normalize_copied_path("./a.css"), "a.css");
        assert_eq!(normalize_copied_path("/site/../img/b.png"), "/site/../img/b.png");
        assert_eq!(normalize_copied_path("/a/././b"), "/a/b");
        assert_eq!(normalize_copied_path("/a/.././b"), "/a/../b");
    }

    #[tokio::test]
    async fn test_register_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("css").join("site.css");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"body{}").unwrap();

        let artifact = LocalArtifactStore::new()
            .register(dir.path(), &file)
            .await
            .unwrap();

        assert_eq!(artifact.relative_path, "css/site.css");
        assert_eq!(artifact.size, 6);
        assert_eq!(
            artifact.checksum,
            hex::encode(Sha256::digest(b"body{}"))
        );
    }

    #[tokio::test]
    async fn test_register_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalArtifactStore::new()
            .register(dir.path(), &dir.path().join("nope.html"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CouldNotWriteFile(msg) if msg.contains("nope.html")));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"a").unwrap();
        let store = LocalArtifactStore::new();
        let artifact = store.register(dir.path(), &file).await.unwrap();

        store.delete(&artifact).await.unwrap();
        assert!(!file.exists());
        store.delete(&artifact).await.unwrap();
    }
}
