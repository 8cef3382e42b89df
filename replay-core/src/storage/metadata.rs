use std::fs;
use std::path::{Path, PathBuf};

use crate::models::artifact::OutputArtifact;
use crate::models::error::CaptureError;

/// Path of the JSON sidecar for an artifact: `{artifact}.metadata.json`.
pub fn sidecar_path(artifact_path: &Path) -> PathBuf {
    let mut name = artifact_path.as_os_str().to_owned();
    name.push(".metadata.json");
    PathBuf::from(name)
}

/// Write artifact metadata as a JSON sidecar file.
pub fn write_metadata(artifact: &OutputArtifact) -> Result<PathBuf, CaptureError> {
    let path = sidecar_path(&artifact.path);
    let json = serde_json::to_string_pretty(artifact)
        .map_err(|e| CaptureError::StorageError(format!("failed to serialize metadata: {}", e)))?;
    fs::write(&path, json)
        .map_err(|e| CaptureError::StorageError(format!("failed to write metadata: {}", e)))?;
    Ok(path)
}

/// Read artifact metadata from its JSON sidecar file.
pub fn read_metadata(artifact_path: &Path) -> Result<OutputArtifact, CaptureError> {
    let json = fs::read_to_string(sidecar_path(artifact_path))
        .map_err(|e| CaptureError::StorageError(format!("failed to read metadata: {}", e)))?;
    serde_json::from_str(&json)
        .map_err(|e| CaptureError::StorageError(format!("failed to parse metadata: {}", e)))
}
