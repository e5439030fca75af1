use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use crate::error::ConvertError;

/// Why a writable directory could not be obtained
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryGrantError {
    /// The host has no way to hand out a directory
    #[error("{0}")]
    Unsupported(String),
    #[error("selection cancelled")]
    Cancelled,
    #[error("{0}")]
    PermissionDenied(String),
}

impl From<DirectoryGrantError> for ConvertError {
    fn from(err: DirectoryGrantError) -> Self {
        match err {
            DirectoryGrantError::Unsupported(msg) => ConvertError::CapabilityMissing(msg),
            DirectoryGrantError::Cancelled => ConvertError::SelectionCancelled,
            DirectoryGrantError::PermissionDenied(msg) => ConvertError::PermissionDenied(msg),
        }
    }
}

/// A granted, writable output location
#[async_trait]
pub trait OutputDirectory: Send + Sync {
    /// Where files end up, for log lines and reports
    fn location(&self) -> String;

    /// Write `contents` as `name`, replacing any existing file
    async fn write_file(&self, name: &str, contents: &[u8]) -> Result<()>;
}

/// Hands out an output directory, possibly after asking the user
#[async_trait]
pub trait DirectoryPicker: Send + Sync {
    async fn request_writable_directory(&self) -> Result<Box<dyn OutputDirectory>, DirectoryGrantError>;
}

/// Local directory on disk
#[derive(Debug, Clone)]
pub struct FsOutputDirectory {
    root: PathBuf,
}

impl FsOutputDirectory {
    pub fn path(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl OutputDirectory for FsOutputDirectory {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn write_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        // Names come from source file names; never let one escape the directory
        let file_name = Path::new(name)
            .file_name()
            .filter(|n| n.len() == name.len())
            .with_context(|| format!("Refusing to write outside the output directory: {}", name))?;

        let target = self.root.join(file_name);
        tokio::fs::write(&target, contents)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        debug!("Wrote {} bytes to {}", contents.len(), target.display());
        Ok(())
    }
}

/// Picks a local directory: the configured one when set, otherwise asks on
/// the terminal.
#[derive(Debug, Clone)]
pub struct FsDirectoryPicker {
    configured: Option<PathBuf>,
    interactive: bool,
}

impl FsDirectoryPicker {
    pub fn new(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            interactive: std::io::stdin().is_terminal(),
        }
    }

    /// Never prompt, even on a terminal
    pub fn non_interactive(configured: Option<PathBuf>) -> Self {
        Self {
            configured,
            interactive: false,
        }
    }

    async fn prompt() -> Result<Option<PathBuf>, DirectoryGrantError> {
        let mut stderr = tokio::io::stderr();
        let unsupported = |e: std::io::Error| DirectoryGrantError::Unsupported(format!("terminal prompt failed: {}", e));

        stderr
            .write_all(b"Output directory (empty to cancel): ")
            .await
            .map_err(unsupported)?;
        stderr.flush().await.map_err(unsupported)?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(unsupported)?;

        let answer = line.trim();
        if answer.is_empty() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(answer)))
    }

    /// Make sure `path` exists and can be written to
    pub async fn grant(path: &Path) -> Result<FsOutputDirectory, DirectoryGrantError> {
        tokio::fs::create_dir_all(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => DirectoryGrantError::PermissionDenied(
                format!("cannot create {}: {}", path.display(), e),
            ),
            _ => DirectoryGrantError::Unsupported(format!("cannot create {}: {}", path.display(), e)),
        })?;

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            DirectoryGrantError::Unsupported(format!("cannot inspect {}: {}", path.display(), e))
        })?;

        if !metadata.is_dir() {
            return Err(DirectoryGrantError::Unsupported(format!("{} is not a directory", path.display())));
        }
        if metadata.permissions().readonly() {
            return Err(DirectoryGrantError::PermissionDenied(format!("{} is read-only", path.display())));
        }

        Ok(FsOutputDirectory {
            root: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl DirectoryPicker for FsDirectoryPicker {
    async fn request_writable_directory(&self) -> Result<Box<dyn OutputDirectory>, DirectoryGrantError> {
        let path = match &self.configured {
            Some(path) => path.clone(),
            None if self.interactive => Self::prompt().await?.ok_or(DirectoryGrantError::Cancelled)?,
            None => {
                return Err(DirectoryGrantError::Unsupported(
                    "no output directory configured and no terminal to ask on".to_string(),
                ))
            }
        };

        let dir = Self::grant(&path).await?;
        info!("📁 Output directory: {}", dir.location());
        Ok(Box::new(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_configured_directory_is_created_and_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out").join("nested");

        let picker = FsDirectoryPicker::non_interactive(Some(target.clone()));
        let dir = picker.request_writable_directory().await.unwrap();
        assert_eq!(dir.location(), target.display().to_string());

        dir.write_file("clip.webm", b"first version").await.unwrap();
        dir.write_file("clip.webm", b"second").await.unwrap();

        let written = std::fs::read(target.join("clip.webm")).unwrap();
        assert_eq!(written, b"second");
    }

    #[tokio::test]
    async fn test_names_cannot_escape_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FsDirectoryPicker::grant(tmp.path()).await.unwrap();

        assert!(dir.write_file("../escape.mp4", b"x").await.is_err());
        assert!(dir.write_file("", b"x").await.is_err());
        assert!(dir.write_file("fine.mp4", b"x").await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_without_config_or_terminal() {
        let picker = FsDirectoryPicker::non_interactive(None);
        let err = picker.request_writable_directory().await.err().unwrap();
        assert!(matches!(err, DirectoryGrantError::Unsupported(_)));
        assert!(matches!(ConvertError::from(err), ConvertError::CapabilityMissing(_)));
    }

    #[tokio::test]
    async fn test_file_instead_of_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("taken");
        std::fs::write(&file, b"").unwrap();

        let err = FsDirectoryPicker::grant(&file).await.err().unwrap();
        assert!(matches!(err, DirectoryGrantError::Unsupported(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_only_directory_is_denied() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let locked = tmp.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        let err = FsDirectoryPicker::grant(&locked).await.err().unwrap();
        assert!(matches!(err, DirectoryGrantError::PermissionDenied(_)));

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_grant_errors_map_to_batch_errors() {
        assert_eq!(ConvertError::from(DirectoryGrantError::Cancelled), ConvertError::SelectionCancelled);
        assert!(ConvertError::from(DirectoryGrantError::PermissionDenied("x".into())).is_batch_fatal());
    }
}
