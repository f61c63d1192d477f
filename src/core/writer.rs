//! Atomic persistence of configuration artifacts.
//!
//! Content is written to a hidden temp file next to the destination, fsynced,
//! then hard-linked into place. `hard_link` fails if the destination exists,
//! so an existing artifact is never replaced, and a reader never observes a
//! half-written file under the final name.

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::models::RunTimestamp;
use crate::error::WriteError;

/// Buffer size used when reading an artifact back for verification.
const READ_BUFFER_SIZE: usize = 64 * 1024;

const ARTIFACT_EXTENSION: &str = "cfg";

/// Hex digits of the id digest appended to a rewritten device id.
const ID_DIGEST_LEN: usize = 8;

/// Hex digits of a job or run id used in fallback names.
const SHORT_ID_LEN: usize = 12;

/// What actually landed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub blake3: String,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    sync_files: bool,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_files: true,
        }
    }

    /// Skip fsync. Only sensible for tests on tmpfs.
    pub fn without_sync(mut self) -> Self {
        self.sync_files = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic destination for a device snapshot:
    /// `<root>/<device>/<device>_<stamp>.cfg`.
    pub fn artifact_path(
        &self,
        device_id: &str,
        timestamp: &RunTimestamp,
    ) -> Result<PathBuf, WriteError> {
        self.path_with_suffix(device_id, timestamp, "")
    }

    /// Destination used when the primary name is already taken by another
    /// job in the same second: `<root>/<device>/<device>_<stamp>-<job>.cfg`.
    pub fn fallback_path(
        &self,
        device_id: &str,
        timestamp: &RunTimestamp,
        job_id: &Uuid,
    ) -> Result<PathBuf, WriteError> {
        self.path_with_suffix(device_id, timestamp, &format!("-{}", short_id(job_id)))
    }

    fn path_with_suffix(
        &self,
        device_id: &str,
        timestamp: &RunTimestamp,
        suffix: &str,
    ) -> Result<PathBuf, WriteError> {
        let component = sanitize_component(device_id)?;
        Ok(self.root.join(&component).join(format!(
            "{}_{}{}.{}",
            component,
            timestamp.file_stamp(),
            suffix,
            ARTIFACT_EXTENSION
        )))
    }

    /// Persist `text` as the artifact for `device_id` at `timestamp`.
    ///
    /// If the timestamped name already exists, the artifact is stored under
    /// the job's fallback name instead. Existing files are never replaced.
    pub async fn write(
        &self,
        device_id: &str,
        timestamp: &RunTimestamp,
        job_id: &Uuid,
        text: &str,
    ) -> Result<StoredArtifact, WriteError> {
        let primary = self.artifact_path(device_id, timestamp)?;
        let fallback = self.fallback_path(device_id, timestamp, job_id)?;
        let bytes = text.as_bytes().to_vec();
        let sync = self.sync_files;

        tokio::task::spawn_blocking(move || write_with_fallback(&primary, &fallback, &bytes, sync))
            .await
            .map_err(|e| WriteError::Task(e.to_string()))?
    }
}

/// Map a device identifier to a single safe path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`. When that changes the
/// identifier, a short blake3 digest of the original is appended, so two
/// distinct identifiers never share a component.
pub fn sanitize_component(device_id: &str) -> Result<String, WriteError> {
    let cleaned: String = device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(WriteError::InvalidDeviceId(device_id.to_string()));
    }

    if cleaned == device_id {
        return Ok(cleaned);
    }

    let digest = blake3::hash(device_id.as_bytes()).to_hex();
    Ok(format!("{}-{}", cleaned, &digest.as_str()[..ID_DIGEST_LEN]))
}

/// Trailing hex digits of an id, used to disambiguate file names.
///
/// The tail of a v7 uuid is random; its head is the millisecond timestamp.
pub(crate) fn short_id(id: &Uuid) -> String {
    let hex = id.simple().to_string();
    hex[hex.len() - SHORT_ID_LEN..].to_string()
}

/// `write_atomic` to `primary`, or to `fallback` if `primary` already exists.
pub(crate) fn write_with_fallback(
    primary: &Path,
    fallback: &Path,
    bytes: &[u8],
    sync: bool,
) -> Result<StoredArtifact, WriteError> {
    match write_atomic(primary, bytes, sync) {
        Err(WriteError::Collision(taken)) => {
            debug!(
                taken = %taken.display(),
                fallback = %fallback.display(),
                "Destination exists, using fallback name"
            );
            write_atomic(fallback, bytes, sync)
        }
        other => other,
    }
}

/// Write `bytes` to `destination` without ever exposing a partial file or
/// replacing an existing one. Creates the parent directory if needed.
pub(crate) fn write_atomic(
    destination: &Path,
    bytes: &[u8],
    sync: bool,
) -> Result<StoredArtifact, WriteError> {
    let parent = destination
        .parent()
        .ok_or_else(|| WriteError::Io {
            path: destination.to_path_buf(),
            source: std::io::Error::new(ErrorKind::InvalidInput, "path has no parent"),
        })?;

    fs::create_dir_all(parent).map_err(|source| WriteError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    if destination.exists() {
        return Err(WriteError::Collision(destination.to_path_buf()));
    }

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.partial", file_name, Uuid::now_v7()));

    let result = write_temp(&temp_path, bytes, sync).and_then(|_| {
        fs::hard_link(&temp_path, destination).map_err(|source| {
            if source.kind() == ErrorKind::AlreadyExists {
                WriteError::Collision(destination.to_path_buf())
            } else {
                WriteError::Io {
                    path: destination.to_path_buf(),
                    source,
                }
            }
        })
    });

    if let Err(e) = fs::remove_file(&temp_path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %temp_path.display(), error = %e, "Failed to remove temp file");
        }
    }
    result?;

    if sync {
        // Persist the new directory entry as well as the file contents.
        if let Err(e) = sync_dir(parent) {
            warn!(path = %parent.display(), error = %e, "Failed to sync directory");
        }
    }

    let (size_bytes, blake3) = read_back(destination)?;
    debug!(path = %destination.display(), size_bytes, "Artifact stored");

    Ok(StoredArtifact {
        path: destination.to_path_buf(),
        size_bytes,
        blake3,
    })
}

fn write_temp(path: &Path, bytes: &[u8], sync: bool) -> Result<(), WriteError> {
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::options()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    if sync {
        file.sync_all().map_err(io_err)?;
    }
    Ok(())
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Size and digest of the file as it exists on disk.
fn read_back(path: &Path) -> Result<(u64, String), WriteError> {
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buffer).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    Ok((total, hasher.finalize().to_hex().to_string()))
}
