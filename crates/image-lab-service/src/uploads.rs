//! Upload storage on the local file system.
//!
//! Files live under `<root>/<user_id>/<uuid>.<ext>` and are addressed by
//! their path relative to the root (`<user_id>/<uuid>.<ext>`). Client-supplied
//! paths are resolved strictly inside the root.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use image_lab_core::UserId;

/// URL prefix under which uploads are served.
pub const UPLOADS_ROUTE: &str = "/uploads";

/// Image types accepted for upload: extension and MIME type.
const SUPPORTED_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
];

/// Errors raised by upload storage.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The path escapes the root or is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The path belongs to another user.
    #[error("path belongs to another user: {0}")]
    Forbidden(String),

    /// The file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The file is not a supported image type.
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),

    /// The file exceeds the size limit.
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge {
        /// Size of the upload.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The upload carried no bytes.
    #[error("empty upload")]
    Empty,

    /// File system error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file found while walking the uploads root.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Path relative to the root, `/`-separated.
    pub path: String,
    /// Last modification time.
    pub modified: SystemTime,
}

/// Local upload storage.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    public_base_url: String,
}

impl UploadStore {
    /// Create a store rooted at `root`. URLs are prefixed with
    /// `public_base_url` (empty for root-relative URLs).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The uploads root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn ensure_root(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Pick the stored extension from the file name, falling back to the
    /// declared content type.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::UnsupportedType`] for anything but png, jpeg,
    /// webp or gif.
    pub fn extension_for(
        file_name: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<&'static str, UploadError> {
        let from_name = file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .and_then(|ext| {
                SUPPORTED_TYPES
                    .iter()
                    .find(|(e, _)| *e == ext)
                    .map(|(e, _)| *e)
            });
        let from_mime = || {
            content_type.and_then(|mime| {
                let mime = mime.to_ascii_lowercase();
                SUPPORTED_TYPES
                    .iter()
                    .find(|(_, m)| *m == mime)
                    .map(|(e, _)| *e)
            })
        };
        from_name.or_else(from_mime).ok_or_else(|| {
            UploadError::UnsupportedType(
                file_name
                    .or(content_type)
                    .unwrap_or("unknown")
                    .to_string(),
            )
        })
    }

    /// MIME type for a stored path.
    #[must_use]
    pub fn content_type_for(path: &str) -> &'static str {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        SUPPORTED_TYPES
            .iter()
            .find(|(e, _)| *e == ext)
            .map_or("application/octet-stream", |(_, m)| *m)
    }

    /// Strip URL and directory prefixes from a client-supplied reference.
    fn normalize(reference: &str) -> &str {
        let trimmed = reference.trim();
        let without_host = match trimmed.find("://") {
            Some(scheme_end) => trimmed[scheme_end + 3..]
                .find('/')
                .map_or("", |i| &trimmed[scheme_end + 3 + i..]),
            None => trimmed,
        };
        let path = without_host.trim_start_matches('/');
        path.strip_prefix("uploads/").unwrap_or(path)
    }

    /// Whether a reference names a file under this store rather than a
    /// remote URL. URLs count as local only when they sit under this
    /// service's own `/uploads` route.
    #[must_use]
    pub fn is_local(&self, reference: &str) -> bool {
        let reference = reference.trim();
        if !reference.contains("://") {
            return true;
        }
        !self.public_base_url.is_empty()
            && reference
                .strip_prefix(self.public_base_url.as_str())
                .and_then(|rest| rest.strip_prefix(UPLOADS_ROUTE))
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Resolve a reference to an absolute path inside the root.
    ///
    /// Accepts `user/file.png`, `/uploads/user/file.png` or a URL under this
    /// service's own `/uploads` route. Returns the normalized relative path
    /// along with the file system path.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidPath`] for remote URLs, empty paths and
    /// any component other than a plain name.
    pub fn resolve(&self, reference: &str) -> Result<(String, PathBuf), UploadError> {
        if !self.is_local(reference) {
            return Err(UploadError::InvalidPath(reference.to_string()));
        }
        let relative = Self::normalize(reference);
        if relative.is_empty() {
            return Err(UploadError::InvalidPath(reference.to_string()));
        }
        let mut full = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => full.push(part),
                _ => return Err(UploadError::InvalidPath(reference.to_string())),
            }
        }
        Ok((relative.to_string(), full))
    }

    /// Resolve a reference that must lie in `user_id`'s directory.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Forbidden`] if the path is outside the user's
    /// directory, plus the errors of [`UploadStore::resolve`].
    pub fn resolve_owned(
        &self,
        user_id: &UserId,
        reference: &str,
    ) -> Result<(String, PathBuf), UploadError> {
        let (relative, full) = self.resolve(reference)?;
        let owner = relative.split('/').next().unwrap_or_default();
        if owner != user_id.to_string() {
            return Err(UploadError::Forbidden(relative));
        }
        Ok((relative, full))
    }

    /// Store `data` as a new file in `user_id`'s directory. Returns the
    /// relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(
        &self,
        user_id: &UserId,
        data: &[u8],
        extension: &str,
    ) -> Result<String, UploadError> {
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        let dir = self.root.join(user_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let name = format!("{}.{extension}", uuid::Uuid::new_v4());
        tokio::fs::write(dir.join(&name), data).await?;

        let relative = format!("{user_id}/{name}");
        tracing::debug!(path = %relative, size = data.len(), "Stored upload");
        Ok(relative)
    }

    /// Read a stored file.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::NotFound`] if the file does not exist.
    pub async fn read(&self, reference: &str) -> Result<Vec<u8>, UploadError> {
        let (relative, full) = self.resolve(reference)?;
        tokio::fs::read(&full).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => UploadError::NotFound(relative),
            _ => UploadError::Io(e),
        })
    }

    /// Whether a stored file exists.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid paths.
    pub async fn exists(&self, reference: &str) -> Result<bool, UploadError> {
        let (_, full) = self.resolve(reference)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    /// Delete a stored file. Returns `false` if it did not exist. References
    /// to remote URLs are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid paths or file system failures.
    pub async fn delete(&self, reference: &str) -> Result<bool, UploadError> {
        if !self.is_local(reference) {
            return Ok(false);
        }
        let (_, full) = self.resolve(reference)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Public URL of a stored file; remote URLs are returned unchanged.
    #[must_use]
    pub fn url_for(&self, reference: &str) -> String {
        if !self.is_local(reference) {
            return reference.to_string();
        }
        format!(
            "{}{UPLOADS_ROUTE}/{}",
            self.public_base_url,
            Self::normalize(reference)
        )
    }

    /// Every file under the root (one directory level per user).
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be read.
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, UploadError> {
        let mut files = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push((entry.path(), relative));
                } else if metadata.is_file() {
                    files.push(StoredFile {
                        path: relative,
                        modified: metadata.modified()?,
                    });
                }
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> UploadStore {
        UploadStore::new(dir.path(), "http://lab.test/")
    }

    #[test]
    fn extension_from_name_or_mime() {
        assert_eq!(UploadStore::extension_for(Some("Photo.JPG"), None).unwrap(), "jpg");
        assert_eq!(
            UploadStore::extension_for(Some("blob"), Some("image/webp")).unwrap(),
            "webp"
        );
        assert!(matches!(
            UploadStore::extension_for(Some("notes.txt"), Some("text/plain")),
            Err(UploadError::UnsupportedType(_))
        ));
    }

    #[test]
    fn resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        for bad in ["../etc/passwd", "u/../../x.png", "", "/uploads/"] {
            assert!(
                matches!(uploads.resolve(bad), Err(UploadError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn resolve_accepts_urls_and_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        for reference in [
            "abc/x.png",
            "/uploads/abc/x.png",
            "uploads/abc/x.png",
            "http://lab.test/uploads/abc/x.png",
        ] {
            let (relative, full) = uploads.resolve(reference).unwrap();
            assert_eq!(relative, "abc/x.png");
            assert_eq!(full, dir.path().join("abc").join("x.png"));
        }
    }

    #[test]
    fn resolve_owned_checks_directory() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        let owner = UserId::generate();
        let other = UserId::generate();
        let path = format!("{owner}/a.png");
        assert!(uploads.resolve_owned(&owner, &path).is_ok());
        assert!(matches!(
            uploads.resolve_owned(&other, &path),
            Err(UploadError::Forbidden(_))
        ));
    }

    #[test]
    fn urls_are_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        assert_eq!(uploads.url_for("u/a.png"), "http://lab.test/uploads/u/a.png");
        assert_eq!(
            uploads.url_for("https://cdn.example.com/x.png"),
            "https://cdn.example.com/x.png"
        );
        assert_eq!(
            uploads.url_for("https://cdn.webhook.example/uploads/2024/out.png"),
            "https://cdn.webhook.example/uploads/2024/out.png"
        );
        assert_eq!(
            uploads.url_for("http://lab.test/uploads/u/a.png"),
            "http://lab.test/uploads/u/a.png"
        );
    }

    #[test]
    fn remote_uploads_urls_are_not_local() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        assert!(uploads.is_local("u/a.png"));
        assert!(uploads.is_local("/uploads/u/a.png"));
        assert!(uploads.is_local("http://lab.test/uploads/u/a.png"));
        assert!(!uploads.is_local("https://cdn.webhook.example/uploads/u/a.png"));
        assert!(!uploads.is_local("http://lab.test.evil/uploads/u/a.png"));
        assert!(matches!(
            uploads.resolve("https://cdn.webhook.example/uploads/u/a.png"),
            Err(UploadError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn delete_ignores_remote_uploads_urls() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        let user = UserId::generate();
        let path = uploads.save(&user, b"keep-me", "png").await.unwrap();

        let remote = format!("https://cdn.webhook.example/uploads/{path}");
        assert!(!uploads.delete(&remote).await.unwrap());
        assert_eq!(uploads.read(&path).await.unwrap(), b"keep-me");
    }

    #[tokio::test]
    async fn save_read_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        let user = UserId::generate();

        let path = uploads.save(&user, b"png-bytes", "png").await.unwrap();
        assert!(path.starts_with(&user.to_string()));
        assert!(path.ends_with(".png"));
        assert_eq!(uploads.read(&path).await.unwrap(), b"png-bytes");

        let files = uploads.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, path);

        assert!(uploads.delete(&path).await.unwrap());
        assert!(!uploads.delete(&path).await.unwrap());
        assert!(matches!(
            uploads.read(&path).await,
            Err(UploadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn save_rejects_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = store(&dir);
        assert!(matches!(
            uploads.save(&UserId::generate(), b"", "png").await,
            Err(UploadError::Empty)
        ));
    }
}
