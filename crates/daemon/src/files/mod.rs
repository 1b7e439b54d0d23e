//! Filesystem side of the broker.
//!
//! This module provides the file operations the move engine performs inside
//! the shared transfer tree:
//! - Path syntax checks for app identities, file names and subdirectories
//! - A rename probe and an atomic copy into the destination inbox
//! - Receipt writing with timestamped backups
//!
//! # Security
//!
//! Caller input is checked syntactically before any path is built, so a
//! rooted or escaping subdirectory is rejected without touching the disk.
//! Resolved directories must then stay inside the app's own outbox or inbox,
//! and the source must be a regular file rather than a link.

pub mod receipt;
pub mod sandbox;
pub mod transfer;

pub use receipt::{write_receipt, ReceiptError, RECEIPT_EXTENSION};
pub use sandbox::{
    ensure_contained, is_regular_file, validate_segment, validate_subdirectory, PathError,
};
pub use transfer::{atomic_copy, probe_rename};
