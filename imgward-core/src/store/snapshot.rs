//! Crash-consistent snapshot files.
//!
//! Snapshots are written to a temporary file in the target directory, synced,
//! and atomically renamed over the previous snapshot, so a failed write never
//! damages the last durable copy. Paths ending in `.cbor` use CBOR, anything
//! else pretty-printed JSON.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, WardenError};

/// Current on-disk snapshot version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Cbor,
}

impl SnapshotFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("cbor") => Self::Cbor,
            _ => Self::Json,
        }
    }
}

pub fn encode<T: Serialize>(value: &T, format: SnapshotFormat) -> Result<Vec<u8>> {
    match format {
        SnapshotFormat::Json => Ok(serde_json::to_vec_pretty(value)?),
        #[cfg(feature = "cbor")]
        SnapshotFormat::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)
                .map_err(|e| WardenError::Serialization(format!("CBOR encode failed: {e}")))?;
            Ok(buf)
        }
        #[cfg(not(feature = "cbor"))]
        SnapshotFormat::Cbor => Err(WardenError::Serialization(
            "CBOR snapshots need the `cbor` feature".into(),
        )),
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], format: SnapshotFormat) -> Result<T> {
    match format {
        SnapshotFormat::Json => Ok(serde_json::from_slice(bytes)?),
        #[cfg(feature = "cbor")]
        SnapshotFormat::Cbor => ciborium::from_reader(bytes)
            .map_err(|e| WardenError::Serialization(format!("CBOR decode failed: {e}"))),
        #[cfg(not(feature = "cbor"))]
        SnapshotFormat::Cbor => Err(WardenError::Serialization(
            "CBOR snapshots need the `cbor` feature".into(),
        )),
    }
}

/// Read a snapshot, `Ok(None)` when the file does not exist yet.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WardenError::store_io(path, e)),
    };
    decode(&bytes, SnapshotFormat::for_path(path))
        .map(Some)
        .map_err(|e| WardenError::store_io(path, e))
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = encode(value, SnapshotFormat::for_path(path))?;
    write_atomic(path, &bytes)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| WardenError::store_io(dir, e))?;

    let mut temp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| WardenError::store_io(dir, e))?;
    temp.write_all(bytes)
        .map_err(|e| WardenError::store_io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| WardenError::store_io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| WardenError::store_io(path, e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Wrote snapshot");
    Ok(())
}
