//! Upload storage: original image bytes under `<data_dir>/uploads/`.
//!
//! Files are named `{uuid}_{sanitized original name}` and written through a
//! temp file in the same directory, so readers (the retraining job included)
//! never observe a partial image and an existing file is never overwritten.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

/// URL prefix stored in scan records.
pub const UPLOADS_URL_PREFIX: &str = "uploads/";

const MAX_FILENAME_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid image path: {0}")]
    InvalidPath(String),

    #[error("Image not found: {0}")]
    NotFound(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub file_name: String,
    pub path: PathBuf,
    /// `uploads/{file_name}`
    pub image_url: String,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dir(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            path: self.root.clone(),
            source,
        })
    }

    /// Write `bytes` under a fresh name derived from `original_name`.
    pub fn save(&self, original_name: &str, bytes: &[u8]) -> Result<StoredImage, StorageError> {
        self.ensure_dir()?;
        let file_name = format!("{}_{}", Uuid::new_v4(), sanitize_filename(original_name));
        let path = self.root.join(&file_name);
        let io_err = |source: std::io::Error| StorageError::Io {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".upload")
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(io_err)?;
        tmp.write_all(bytes).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist_noclobber(&path).map_err(|e| io_err(e.error))?;

        tracing::debug!(file = %file_name, bytes = bytes.len(), "Upload stored");
        Ok(StoredImage {
            image_url: format!("{UPLOADS_URL_PREFIX}{file_name}"),
            file_name,
            path,
        })
    }

    /// Map a stored `image_url` back to a file under the uploads root.
    ///
    /// Accepts `uploads/{name}`, a bare name, or an absolute URL such as
    /// `http://host:8000/uploads/{name}`. Anything that would escape the
    /// root (`..`, absolute paths, drive prefixes) is rejected.
    pub fn resolve(&self, image_url: &str) -> Result<PathBuf, StorageError> {
        let trimmed = image_url.trim();
        let without_scheme = match trimmed.find("://") {
            Some(idx) => {
                let rest = &trimmed[idx + 3..];
                match rest.find('/') {
                    Some(slash) => &rest[slash + 1..],
                    None => "",
                }
            }
            None => trimmed,
        };
        let relative = without_scheme
            .strip_prefix(UPLOADS_URL_PREFIX)
            .unwrap_or(without_scheme);

        if relative.is_empty() {
            return Err(StorageError::InvalidPath(image_url.to_string()));
        }

        let candidate = Path::new(relative);
        if !candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(image_url.to_string()));
        }
        Ok(self.root.join(candidate))
    }

    /// Read the bytes behind an `image_url`.
    pub fn read(&self, image_url: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(image_url)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path)),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    // Keep only the final component of whatever path the client sent.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let sanitized: String = base
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Remove consecutive dots (path traversal prevention)
    let sanitized = sanitized.replace("..", "");
    let sanitized: String = sanitized.chars().take(MAX_FILENAME_CHARS).collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "scan.png".into()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_image_reads_back_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("uploads"));
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let stored = store.save("retina scan.png", &bytes).unwrap();
        assert!(stored.image_url.starts_with("uploads/"));
        assert!(stored.file_name.ends_with("_retina_scan.png"));

        let path = store.resolve(&stored.image_url).unwrap();
        assert_eq!(path, stored.path);
        assert_eq!(store.read(&stored.image_url).unwrap(), bytes);
    }

    #[test]
    fn same_name_twice_gets_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().to_path_buf());
        let a = store.save("a.png", b"first").unwrap();
        let b = store.save("a.png", b"second").unwrap();
        assert_ne!(a.path, b.path);
        assert_eq!(std::fs::read(&a.path).unwrap(), b"first");
    }

    #[test]
    fn no_temp_files_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().to_path_buf());
        store.save("a.png", b"data").unwrap();
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn resolve_strips_scheme_and_host() {
        let store = UploadStore::new(PathBuf::from("/data/uploads"));
        assert_eq!(
            store
                .resolve("http://localhost:8000/uploads/abc_scan.png")
                .unwrap(),
            PathBuf::from("/data/uploads/abc_scan.png")
        );
        assert_eq!(
            store.resolve("uploads/abc_scan.png").unwrap(),
            PathBuf::from("/data/uploads/abc_scan.png")
        );
        assert_eq!(
            store.resolve("abc_scan.png").unwrap(),
            PathBuf::from("/data/uploads/abc_scan.png")
        );
    }

    #[test]
    fn resolve_rejects_escapes() {
        let store = UploadStore::new(PathBuf::from("/data/uploads"));
        for bad in [
            "uploads/../octscan.db",
            "../secret",
            "/etc/passwd",
            "http://evil/uploads/../../x",
            "",
            "http://host-only",
        ] {
            assert!(
                matches!(store.resolve(bad), Err(StorageError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.read("uploads/ghost.png"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn sanitize_filename_strips_paths_and_specials() {
        assert_eq!(sanitize_filename("scan.png"), "scan.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\scans\\left eye.jpg"), "left_eye.jpg");
        assert_eq!(sanitize_filename(""), "scan.png");
        assert_eq!(sanitize_filename(".."), "scan.png");
        assert_eq!(sanitize_filename(&"a".repeat(300)).len(), 100);
    }
}
