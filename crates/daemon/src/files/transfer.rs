//! File copy primitives used by the move engine.
//!
//! - A rename probe that fails fast on a source file that is still in use
//! - An atomic copy that stages bytes in a hidden sibling and renames it
//!   onto the final name

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Suffix used by the rename probe.
pub const PROBE_SUFFIX: &str = ".tmp";

/// Path the rename probe moves `source` to.
pub fn probe_path(source: &Path) -> PathBuf {
    let mut name = source.file_name().unwrap_or_default().to_os_string();
    name.push(PROBE_SUFFIX);
    source.with_file_name(name)
}

/// Rename `source` to its probe name and straight back.
///
/// The round trip fails when another process holds the file in a way that
/// blocks renames. It does not prove that no writer is active. The probe
/// refuses to run when the probe name is already taken, so no existing file
/// is ever replaced.
pub fn probe_rename(source: &Path) -> io::Result<()> {
    let probe = probe_path(source);
    if fs::symlink_metadata(&probe).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("probe path {} already exists", probe.display()),
        ));
    }

    fs::rename(source, &probe)?;
    if let Err(e) = fs::rename(&probe, source) {
        warn!(
            source = ?source,
            probe = ?probe,
            error = %e,
            "Failed to restore file after rename probe"
        );
        return Err(e);
    }

    debug!(source = ?source, "Rename probe passed");
    Ok(())
}

/// Hidden, unique staging name for `destination` in the same directory.
pub fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple()))
}

/// Copy `source` onto `destination` so readers only ever see a complete file.
///
/// Bytes go to a staging sibling first, are flushed to disk, then renamed
/// over `destination`. The staging file is removed on any failure. Returns
/// the number of bytes copied.
pub fn atomic_copy(source: &Path, destination: &Path) -> io::Result<u64> {
    let staging = staging_path(destination);

    let result = fs::copy(source, &staging).and_then(|bytes| {
        File::open(&staging)?.sync_all()?;
        fs::rename(&staging, destination)?;
        Ok(bytes)
    });

    if result.is_err() {
        if let Err(e) = fs::remove_file(&staging) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?staging, error = %e, "Failed to clean up staging file");
            }
        }
    }

    result
}

/// Write `contents` to `path` through a staging sibling and rename.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let staging = staging_path(path);

    let result = fs::write(&staging, contents).and_then(|()| {
        File::open(&staging)?.sync_all()?;
        fs::rename(&staging, path)
    });

    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }

    result
}
