//! Receipts written beside delivered files.
//!
//! A receipt is the pretty-printed JSON of the final [`LinkResponse`], stored
//! as `<fileName>.linkResponse` in the destination directory. An existing
//! receipt is never overwritten; it is first renamed to
//! `<fileName>.<yyyyMMdd_HHmmss>.linkResponse`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use link_protocol::{LinkResponse, ProtocolError};
use thiserror::Error;
use tracing::{debug, info};

use super::transfer::atomic_write;

/// Extension shared by receipts and their backups.
pub const RECEIPT_EXTENSION: &str = "linkResponse";

/// Errors that can occur while writing a receipt.
#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("failed to encode receipt: {0}")]
    Encode(#[from] ProtocolError),

    #[error("failed to back up existing receipt {path}: {source}")]
    Backup { path: PathBuf, source: io::Error },

    #[error("failed to write receipt {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Receipt path for `file_name` in `dir`.
pub fn receipt_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!("{file_name}.{RECEIPT_EXTENSION}"))
}

/// First free backup path for a receipt replaced at `now`.
///
/// Collisions within the same second get `_1`, `_2`, ... appended to the
/// timestamp.
pub fn backup_path(dir: &Path, file_name: &str, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = dir.join(format!("{file_name}.{stamp}.{RECEIPT_EXTENSION}"));
    let mut n = 1u32;
    while fs::symlink_metadata(&candidate).is_ok() {
        candidate = dir.join(format!("{file_name}.{stamp}_{n}.{RECEIPT_EXTENSION}"));
        n += 1;
    }
    candidate
}

/// Write the receipt for `response` into `dir`, backing up any previous one.
pub fn write_receipt(
    dir: &Path,
    file_name: &str,
    response: &LinkResponse,
) -> Result<PathBuf, ReceiptError> {
    let json = response.to_json_pretty()?;
    let path = receipt_path(dir, file_name);

    if fs::symlink_metadata(&path).is_ok() {
        let backup = backup_path(dir, file_name, Utc::now());
        fs::rename(&path, &backup).map_err(|source| ReceiptError::Backup {
            path: path.clone(),
            source,
        })?;
        info!(receipt = ?path, backup = ?backup, "Backed up previous receipt");
    }

    atomic_write(&path, json.as_bytes()).map_err(|source| ReceiptError::Write {
        path: path.clone(),
        source,
    })?;

    debug!(receipt = ?path, tracking_id = %response.tracking_id(), "Receipt written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use link_protocol::{LinkRequest, StatusCode};
    use tempfile::TempDir;

    use super::*;

    fn response(tracking_id: &str) -> LinkResponse {
        let mut response =
            LinkResponse::pending(LinkRequest::new("a.jpg", "appb").with_ids(tracking_id, "c"));
        response.set_status(StatusCode::Successful, "");
        response.file_size_kb = Some(3);
        response
    }

    #[test]
    fn test_receipt_path() {
        assert_eq!(
            receipt_path(Path::new("/x/inbox"), "a.jpg"),
            PathBuf::from("/x/inbox/a.jpg.linkResponse")
        );
    }

    #[test]
    fn test_backup_path_collisions() {
        let temp_dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();

        let first = backup_path(temp_dir.path(), "a.jpg", now);
        assert_eq!(
            first.file_name().unwrap(),
            "a.jpg.20240309_070501.linkResponse"
        );

        fs::write(&first, "x").unwrap();
        let second = backup_path(temp_dir.path(), "a.jpg", now);
        assert_eq!(
            second.file_name().unwrap(),
            "a.jpg.20240309_070501_1.linkResponse"
        );

        fs::write(&second, "x").unwrap();
        let third = backup_path(temp_dir.path(), "a.jpg", now);
        assert_eq!(
            third.file_name().unwrap(),
            "a.jpg.20240309_070501_2.linkResponse"
        );
    }

    #[test]
    fn test_write_receipt() {
        let temp_dir = TempDir::new().unwrap();

        let path = write_receipt(temp_dir.path(), "a.jpg", &response("t-1")).unwrap();

        let written = LinkResponse::from_json(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, response("t-1"));
    }

    #[test]
    fn test_write_receipt_keeps_previous() {
        let temp_dir = TempDir::new().unwrap();

        write_receipt(temp_dir.path(), "a.jpg", &response("first")).unwrap();
        write_receipt(temp_dir.path(), "a.jpg", &response("second")).unwrap();
        write_receipt(temp_dir.path(), "a.jpg", &response("third")).unwrap();

        let current = fs::read_to_string(receipt_path(temp_dir.path(), "a.jpg")).unwrap();
        assert_eq!(LinkResponse::from_json(&current).unwrap().tracking_id(), "third");

        let mut backups: Vec<String> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != "a.jpg.linkResponse")
            .collect();
        backups.sort();
        assert_eq!(backups.len(), 2);
        assert!(backups
            .iter()
            .all(|name| name.starts_with("a.jpg.") && name.ends_with(".linkResponse")));

        let mut ids: Vec<String> = backups
            .iter()
            .map(|name| {
                let json = fs::read_to_string(temp_dir.path().join(name)).unwrap();
                LinkResponse::from_json(&json).unwrap().tracking_id().to_string()
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
