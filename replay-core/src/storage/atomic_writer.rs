use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;

/// Writes an artifact to a temporary file next to its final path and
/// renames it into place on `commit`.
///
/// The SHA-256 of everything written is computed as bytes go through, so
/// `commit` does not re-read the file. A writer dropped without `commit`
/// deletes its temporary file, which is how failed and cancelled flushes
/// clean up.
///
/// Writes fail with `io::ErrorKind::Other` once the shared cancel flag is
/// set; `Interrupted` would be retried by `write_all`.
pub struct AtomicFileWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    file: Option<BufWriter<File>>,
    hasher: Sha256,
    total_bytes_written: u64,
    cancel: Arc<AtomicBool>,
}

impl AtomicFileWriter {
    /// Create the temporary file, creating missing parent directories.
    pub fn create(final_path: PathBuf, cancel: Arc<AtomicBool>) -> Result<Self, CaptureError> {
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::StorageError(format!("failed to create directory: {}", e))
                })?;
            }
        }

        let temp_path = temp_path_for(&final_path);
        let file = File::create(&temp_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;
        log::debug!("Writing {}", temp_path.display());

        Ok(Self {
            final_path,
            temp_path,
            file: Some(BufWriter::new(file)),
            hasher: Sha256::new(),
            total_bytes_written: 0,
            cancel,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Flush, sync and rename into place. Returns the SHA-256 hex digest.
    pub fn commit(mut self) -> Result<String, CaptureError> {
        if self.is_cancelled() {
            return Err(CaptureError::FlushCancelled);
        }
        let file = self
            .file
            .take()
            .ok_or_else(|| CaptureError::StorageError("file is not open".into()))?;
        let file = file
            .into_inner()
            .map_err(|e| CaptureError::StorageError(format!("flush failed: {}", e.error())))?;
        file.sync_all()
            .map_err(|e| CaptureError::StorageError(format!("sync failed: {}", e)))?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path)
            .map_err(|e| CaptureError::StorageError(format!("rename failed: {}", e)))?;

        let digest = std::mem::take(&mut self.hasher).finalize();
        // nothing left for Drop to clean up
        self.temp_path = PathBuf::new();
        Ok(hex_encode(&digest))
    }
}

impl Write for AtomicFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Other, "write cancelled"));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file is not open"))?;
        let written = file.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.total_bytes_written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFileWriter {
    fn drop(&mut self) {
        self.file = None;
        if self.temp_path.as_os_str().is_empty() {
            return;
        }
        match fs::remove_file(&self.temp_path) {
            Ok(()) => log::debug!("Discarded {}", self.temp_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", self.temp_path.display(), e),
        }
    }
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "replay".into());
    final_path.with_file_name(format!(".{}.{}.partial", name, uuid::Uuid::new_v4().simple()))
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data = fs::read(path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    Ok(hex_encode(&Sha256::digest(&data)))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(dir: &Path, name: &str) -> (AtomicFileWriter, Arc<AtomicBool>) {
        let cancel = Arc::new(AtomicBool::new(false));
        let w = AtomicFileWriter::create(dir.join(name), Arc::clone(&cancel)).unwrap();
        (w, cancel)
    }

    #[test]
    fn commit_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, _) = writer(dir.path(), "clip.mkv");
        let temp = w.temp_path().to_path_buf();
        assert!(temp.exists());

        w.write_all(b"replay data").unwrap();
        assert_eq!(w.bytes_written(), 11);
        let checksum = w.commit().unwrap();

        let final_path = dir.path().join("clip.mkv");
        assert!(!temp.exists());
        assert_eq!(fs::read(&final_path).unwrap(), b"replay data");
        assert_eq!(checksum, sha256_file(&final_path).unwrap());
        assert_eq!(checksum.len(), 64);
    }

    #[test]
    fn creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, _) = writer(dir.path(), "a/b/clip.mkv");
        w.write_all(b"x").unwrap();
        w.commit().unwrap();
        assert!(dir.path().join("a/b/clip.mkv").exists());
    }

    #[test]
    fn drop_without_commit_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, _) = writer(dir.path(), "clip.mkv");
        w.write_all(b"partial").unwrap();
        let temp = w.temp_path().to_path_buf();
        drop(w);

        assert!(!temp.exists());
        assert!(!dir.path().join("clip.mkv").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn cancel_stops_writes_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut w, cancel) = writer(dir.path(), "clip.mkv");
        w.write_all(b"before").unwrap();

        cancel.store(true, Ordering::SeqCst);
        let err = w.write_all(b"after").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(w.commit().unwrap_err(), CaptureError::FlushCancelled);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn sha256_of_known_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
