//! Crash-safe writes for the files a run leaves in its output directory.
//!
//! `progress.json` is rewritten after every validation round; readers must
//! only ever see the previous round's file or the new one.

use crate::error::DcnError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::ser::PrettyFormatter;
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// `<path>.tmp`, kept next to the target so the rename stays on one filesystem.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `data` as JSON with a 4-space indent and replace `path` with it.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<(), DcnError> {
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    data.serialize(&mut ser)?;
    atomic_write(path, &buf)
}

/// Replace `path` with `bytes`, creating missing parent directories.
///
/// The bytes are synced to a staging file before it is renamed over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), DcnError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = staging_path(path);
    let mut file = File::create(&staging)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&staging, path)?;
    Ok(())
}

/// Read a JSON file written by [`atomic_write_json`]; `Ok(None)` if it does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DcnError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}
