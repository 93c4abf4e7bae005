use std::path::{Path, PathBuf};

use crate::storage::{InvalidLocationSnafu, StorageResult};

/// Root location of a table.
///
/// Only the local filesystem is supported. The enum shape leaves room for
/// object-store backends without changing callers that go through the
/// helpers in [`crate::storage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLocation {
    /// A table stored on the local filesystem at the given path.
    Local(PathBuf),
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }

    /// Parse a user-facing location string.
    ///
    /// Accepts a plain filesystem path or a `file://` URL. Any other URL
    /// scheme is rejected.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return InvalidLocationSnafu {
                spec: spec.to_string(),
                reason: "location is empty".to_string(),
            }
            .fail();
        }

        if let Some(rest) = trimmed.strip_prefix("file://") {
            if rest.is_empty() {
                return InvalidLocationSnafu {
                    spec: spec.to_string(),
                    reason: "file:// URL has no path".to_string(),
                }
                .fail();
            }
            return Ok(TableLocation::local(rest));
        }

        if let Some((scheme, _)) = trimmed.split_once("://") {
            return InvalidLocationSnafu {
                spec: spec.to_string(),
                reason: format!("scheme {scheme:?} is not supported"),
            }
            .fail();
        }

        Ok(TableLocation::local(trimmed))
    }

    /// Local root directory of the table.
    pub fn root(&self) -> &Path {
        match self {
            TableLocation::Local(root) => root,
        }
    }
}

impl std::fmt::Display for TableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableLocation::Local(root) => write!(f, "{}", root.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn parse_accepts_plain_paths_and_file_urls() {
        assert_eq!(
            TableLocation::parse("/tmp/t").unwrap(),
            TableLocation::local("/tmp/t")
        );
        assert_eq!(
            TableLocation::parse("file:///tmp/t").unwrap(),
            TableLocation::local("/tmp/t")
        );
    }

    #[test]
    fn parse_rejects_remote_schemes_and_empty() {
        assert!(matches!(
            TableLocation::parse("s3://bucket/t"),
            Err(StorageError::InvalidLocation { .. })
        ));
        assert!(matches!(
            TableLocation::parse("   "),
            Err(StorageError::InvalidLocation { .. })
        ));
    }
}
