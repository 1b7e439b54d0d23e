//! Checks that keep every path inside the per-app transfer tree.
//!
//! The syntax checks run on the strings the caller supplied, before the move
//! engine looks at a single directory. [`ensure_contained`] runs afterwards
//! and resolves links, so a symlink planted in an app directory cannot point
//! the engine outside it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Characters never accepted in an app identity, file name or subdirectory.
const INVALID_CHARS: &[char] = &['<', '>', '|', '"', '*', '?'];

/// Rejected path input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} contains invalid characters: {value:?}")]
    InvalidCharacters { field: &'static str, value: String },

    #[error("{field} must be a single path segment: {value:?}")]
    NotASegment { field: &'static str, value: String },

    #[error("subdirectory must be a relative path: {0:?}")]
    Rooted(String),

    #[error("subdirectory must not leave the app directory: {0:?}")]
    Traversal(String),

    #[error("{} resolves outside {}", .path.display(), .base.display())]
    Escapes { path: PathBuf, base: PathBuf },

    #[error("not a regular file: {}", .0.display())]
    NotRegularFile(PathBuf),
}

fn has_invalid_chars(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_ascii_control() || INVALID_CHARS.contains(&c))
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Check that `value` names exactly one directory entry.
///
/// Used for app identities and file names.
pub fn validate_segment(field: &'static str, value: &str) -> Result<(), PathError> {
    if value.is_empty() {
        return Err(PathError::Empty { field });
    }
    if has_invalid_chars(value) {
        return Err(PathError::InvalidCharacters {
            field,
            value: value.to_string(),
        });
    }
    if value.contains(is_separator) || value == "." || value == ".." {
        return Err(PathError::NotASegment {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Check a caller-supplied subdirectory and return it as a relative path.
///
/// Both `/` and `\` count as separators. Surrounding whitespace is ignored.
/// Empty and `.` components are dropped; a leading separator or any `..`
/// component is rejected. An input that reduces to nothing yields an empty
/// path.
pub fn validate_subdirectory(value: &str) -> Result<PathBuf, PathError> {
    let value = value.trim();
    if has_invalid_chars(value) {
        return Err(PathError::InvalidCharacters {
            field: "subdirectory",
            value: value.to_string(),
        });
    }
    if value.starts_with(is_separator) {
        return Err(PathError::Rooted(value.to_string()));
    }

    let mut path = PathBuf::new();
    for component in value.split(is_separator) {
        match component {
            "" | "." => {}
            ".." => return Err(PathError::Traversal(value.to_string())),
            name => path.push(name),
        }
    }
    Ok(path)
}

/// Resolve every link in `path` and check that the result lies under `base`.
///
/// `base` must already be canonical. A path that does not exist passes; the
/// caller reports missing entries itself.
pub fn ensure_contained(path: &Path, base: &Path) -> Result<(), PathError> {
    let escapes = || PathError::Escapes {
        path: path.to_path_buf(),
        base: base.to_path_buf(),
    };

    match fs::canonicalize(path) {
        Ok(resolved) if resolved.starts_with(base) => Ok(()),
        Ok(_) => Err(escapes()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(_) => Err(escapes()),
    }
}

/// Check that `path` is a regular file itself, not a link to one.
///
/// `Ok(false)` when nothing usable exists at `path`.
pub fn is_regular_file(path: &Path) -> Result<bool, PathError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            Err(PathError::NotRegularFile(path.to_path_buf()))
        }
        Ok(meta) => Ok(meta.is_file()),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_accepts_plain_names() {
        for name in ["a.jpg", "appb", "platform-mts", "file with spaces.txt", ".hidden"] {
            assert!(validate_segment("fileName", name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_segment_rejections() {
        assert_eq!(
            validate_segment("fileName", ""),
            Err(PathError::Empty { field: "fileName" })
        );
        assert!(matches!(
            validate_segment("fileName", "a/b"),
            Err(PathError::NotASegment { .. })
        ));
        assert!(matches!(
            validate_segment("fileName", "a\\b"),
            Err(PathError::NotASegment { .. })
        ));
        assert!(matches!(
            validate_segment("destinationAppId", ".."),
            Err(PathError::NotASegment { .. })
        ));
        assert!(matches!(
            validate_segment("fileName", "what?.txt"),
            Err(PathError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_segment("fileName", "nul\0byte"),
            Err(PathError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn test_subdirectory_relative() {
        assert_eq!(validate_subdirectory("images").unwrap(), PathBuf::from("images"));
        assert_eq!(
            validate_subdirectory("images/2024/./raw/").unwrap(),
            PathBuf::from("images/2024/raw")
        );
        assert_eq!(
            validate_subdirectory("a\\b").unwrap(),
            PathBuf::from("a").join("b")
        );
        assert_eq!(validate_subdirectory("./").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_subdirectory_whitespace_is_unset() {
        assert_eq!(validate_subdirectory(" ").unwrap(), PathBuf::new());
        assert_eq!(validate_subdirectory("\t \n").unwrap(), PathBuf::new());
        assert_eq!(
            validate_subdirectory("  images/raw ").unwrap(),
            PathBuf::from("images/raw")
        );
    }

    #[test]
    fn test_subdirectory_traversal() {
        assert_eq!(
            validate_subdirectory("../../etc"),
            Err(PathError::Traversal("../../etc".to_string()))
        );
        assert!(matches!(
            validate_subdirectory("images/../../other"),
            Err(PathError::Traversal(_))
        ));
        assert!(matches!(
            validate_subdirectory("..\\secrets"),
            Err(PathError::Traversal(_))
        ));
    }

    #[test]
    fn test_subdirectory_rooted() {
        assert!(matches!(validate_subdirectory("/etc"), Err(PathError::Rooted(_))));
        assert!(matches!(
            validate_subdirectory("\\\\server\\share"),
            Err(PathError::Rooted(_))
        ));
    }

    #[test]
    fn test_subdirectory_invalid_characters() {
        for bad in ["a|b", "a<b", "x\ny", "star*", "q\"uote"] {
            assert!(
                matches!(
                    validate_subdirectory(bad),
                    Err(PathError::InvalidCharacters { .. })
                ),
                "{bad:?}"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_contained_rejects_links_out() {
        use std::os::unix::fs::symlink;

        let temp = tempfile::TempDir::new().unwrap();
        let base = temp.path().join("appa").join("outbox");
        fs::create_dir_all(base.join("real")).unwrap();
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        symlink(&outside, base.join("linked")).unwrap();
        let base = fs::canonicalize(&base).unwrap();

        assert!(ensure_contained(&base.join("real"), &base).is_ok());
        assert!(ensure_contained(&base.join("missing"), &base).is_ok());
        assert!(matches!(
            ensure_contained(&base.join("linked"), &base),
            Err(PathError::Escapes { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_regular_file_refuses_symlink() {
        use std::os::unix::fs::symlink;

        let temp = tempfile::TempDir::new().unwrap();
        let real = temp.path().join("a.txt");
        fs::write(&real, b"data").unwrap();
        symlink(&real, temp.path().join("b.txt")).unwrap();

        assert_eq!(is_regular_file(&real), Ok(true));
        assert_eq!(is_regular_file(&temp.path().join("missing")), Ok(false));
        assert_eq!(is_regular_file(temp.path()), Ok(false));
        assert!(matches!(
            is_regular_file(&temp.path().join("b.txt")),
            Err(PathError::NotRegularFile(_))
        ));
    }
}
