use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use walkdir::WalkDir;
use crate::media::SourceFile;
use log::{debug, info, warn};

/// Extensions picked up when a batch input is a directory
const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "m4v", "avi", "mov", "webm", "wmv", "flv", "mpg", "mpeg", "ts", "3gp", "ogv",
];

fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand batch inputs into an ordered list of sources.
///
/// Files named explicitly are taken as given, whatever their extension.
/// Directories are walked recursively and contribute their media files in
/// path order. Duplicates keep their first position.
pub async fn collect_media_files(inputs: &[PathBuf]) -> Result<Vec<SourceFile>> {
    let mut paths: Vec<PathBuf> = Vec::new();

    for input in inputs {
        if input.is_dir() {
            info!("Scanning directory: {}", input.display());

            let mut found: Vec<PathBuf> = Vec::new();
            for entry in WalkDir::new(input).follow_links(false) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("Error reading directory entry: {}", e);
                        continue;
                    }
                };

                let path = entry.path();
                if !entry.file_type().is_file() || !is_media_file(path) {
                    continue;
                }

                debug!("Found media file: {}", path.display());
                found.push(path.to_path_buf());
            }

            found.sort();
            info!("Found {} media files in {}", found.len(), input.display());
            paths.extend(found);
        } else {
            paths.push(input.clone());
        }
    }

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        if sources.iter().any(|s: &SourceFile| s.path == path) {
            continue;
        }
        let source = SourceFile::open(&path)
            .await
            .with_context(|| format!("Cannot use batch input: {}", path.display()))?;
        sources.push(source);
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_extension_filter() {
        assert!(is_media_file(Path::new("/a/clip.MOV")));
        assert!(is_media_file(Path::new("movie.mkv")));
        assert!(!is_media_file(Path::new("notes.txt")));
        assert!(!is_media_file(Path::new("README")));
    }

    #[tokio::test]
    async fn test_directories_expand_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("b.mp4"), b"bb").unwrap();
        std::fs::write(root.join("a.mov"), b"a").unwrap();
        std::fs::write(root.join("sub").join("c.webm"), b"ccc").unwrap();
        std::fs::write(root.join("cover.jpg"), b"x").unwrap();

        let extra = root.join("raw.bin");
        std::fs::write(&extra, b"zz").unwrap();

        let sources = collect_media_files(&[extra.clone(), root.to_path_buf(), root.join("a.mov")])
            .await
            .unwrap();

        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["raw.bin", "a.mov", "b.mp4", "c.webm"]);
        assert_eq!(sources[2].size, 2);
    }

    #[tokio::test]
    async fn test_missing_input_is_an_error() {
        let err = collect_media_files(&[PathBuf::from("/nonexistent/clip.mp4")])
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/clip.mp4"));
    }
}
