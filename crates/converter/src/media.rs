use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A source file accepted for conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: PathBuf,
    /// File name as shown to the user and used to derive output names
    pub name: String,
    /// Size on disk in bytes
    pub size: u64,
}

impl SourceFile {
    /// Stat a file on disk and build a source handle for it
    pub async fn open(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat source file: {}", path.display()))?;

        if !metadata.is_file() {
            anyhow::bail!("Not a regular file: {}", path.display());
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Source path has no usable file name: {}", path.display()))?
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }
}

/// Video track facts reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrack {
    pub display_width: u32,
    pub display_height: u32,
    pub codec: Option<String>,
}

/// Audio track facts reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub codec: Option<String>,
}

/// The fixed set of container tags we ever read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MetadataTags {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.comment.is_none()
            && self.description.is_none()
    }
}

/// Read-only facts about a loaded source, computed once when it is accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProbe {
    pub duration_secs: f64,
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
    pub tags: Option<MetadataTags>,
}

impl MediaProbe {
    /// Resolution as `WxH`, if the source has a video track
    pub fn resolution(&self) -> Option<String> {
        self.video
            .as_ref()
            .map(|v| format!("{}x{}", v.display_width, v.display_height))
    }
}
