use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to create upload directory {0:?}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("Failed to write upload {0:?}: {1}")]
    Write(PathBuf, std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub name: String,
    pub path: PathBuf,
}

/// Directory holding uploaded images. Files are never cleaned up by the
/// service.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self, UploadError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| UploadError::CreateDir(dir.clone(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, filename: &str, data: &[u8]) -> Result<StoredUpload, UploadError> {
        let name = format!("{}_{}", Uuid::new_v4().simple(), secure_filename(filename));
        let path = self.dir.join(&name);

        tokio::fs::write(&path, data)
            .await
            .map_err(|e| UploadError::Write(path.clone(), e))?;
        tracing::info!("File saved at: {:?}", path);

        Ok(StoredUpload { name, path })
    }
}

/// Reduces a client-supplied filename to a safe ASCII name without any path
/// components.
pub fn secure_filename(filename: &str) -> String {
    let filename = filename.replace(['/', '\\'], " ");
    let joined = filename
        .split_whitespace()
        .map(|part| {
            part.chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
                .collect::<String>()
        })
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    let trimmed = joined.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool xray.png"), "My_cool_xray.png");
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("C:\\scans\\chest.jpg"), "C_scans_chest.jpg");
        assert_eq!(secure_filename("..."), "upload");
        assert_eq!(secure_filename("rön tgen.jpeg"), "rn_tgen.jpeg");
        assert_eq!(secure_filename(""), "upload");
    }

    #[tokio::test]
    async fn test_save_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = UploadStore::new(tmp.path().join("uploads")).await.unwrap();

        let stored = store.save("../scan.png", b"image-bytes").await.unwrap();

        assert!(stored.name.ends_with("_scan.png"));
        assert_eq!(stored.path.parent().unwrap(), store.dir());
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"image-bytes");
    }
}
