use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::artifact::{Artifact, ArtifactMetadata};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("artifact metadata is malformed: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Write an artifact into `dir` as `scan_<session>.<ext>` plus its JSON
/// sidecar, creating `dir` if needed. Returns the artifact path.
pub fn persist_artifact(
    artifact: &Artifact,
    metadata: &ArtifactMetadata,
    dir: &Path,
) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(artifact.file_name(&metadata.session_id));
    fs::write(&path, &artifact.bytes)?;
    write_metadata(metadata, &path)?;
    Ok(path)
}

/// Write artifact metadata as a JSON sidecar file.
///
/// Creates `scan_<session>.metadata.json` alongside the artifact.
pub fn write_metadata(metadata: &ArtifactMetadata, artifact_path: &Path) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(metadata)?;
    fs::write(sidecar_path(artifact_path), json)?;
    Ok(())
}

/// Read artifact metadata from its JSON sidecar file.
pub fn read_metadata(artifact_path: &Path) -> Result<ArtifactMetadata, StorageError> {
    let json = fs::read_to_string(sidecar_path(artifact_path))?;
    Ok(serde_json::from_str(&json)?)
}

fn sidecar_path(artifact_path: &Path) -> PathBuf {
    artifact_path.with_extension("metadata.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::device::OutputFormat;
    use crate::models::page::{PageInfo, PixelLayout};

    fn artifact() -> Artifact {
        Artifact {
            bytes: b"II*\0fake tiff body".to_vec(),
            format: OutputFormat::Tiff,
            pages: vec![
                PageInfo {
                    width: 10,
                    height: 20,
                    layout: PixelLayout::Rgb8,
                    resolution_dpi: 300,
                },
                PageInfo {
                    width: 10,
                    height: 20,
                    layout: PixelLayout::Gray8,
                    resolution_dpi: 150,
                },
            ],
            checksum: "ab".repeat(32),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn persists_artifact_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact();
        let metadata = artifact.metadata("scan-000007", "feeder-0");

        let path = persist_artifact(&artifact, &metadata, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "scan_scan-000007.tiff");
        assert_eq!(fs::read(&path).unwrap(), artifact.bytes);
        assert!(dir.path().join("scan_scan-000007.metadata.json").exists());

        let loaded = read_metadata(&path).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded.pages.len(), 2);
        assert_eq!(loaded.size_bytes, artifact.bytes.len() as u64);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scans").join("2026");
        let artifact = artifact();
        let metadata = artifact.metadata("scan-000001", "flatbed-0");

        let path = persist_artifact(&artifact, &metadata, &nested).unwrap();
        assert!(path.starts_with(&nested));
    }

    #[test]
    fn missing_sidecar_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_metadata(&dir.path().join("scan_missing.png")).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn malformed_sidecar_is_metadata_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_bad.png");
        fs::write(dir.path().join("scan_bad.metadata.json"), "{ not json").unwrap();
        assert!(matches!(read_metadata(&path), Err(StorageError::Metadata(_))));
    }
}
