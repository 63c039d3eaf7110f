//! Error type for checkpoint storage

use std::path::PathBuf;

/// Failure reading or writing a checkpoint record.
///
/// Every variant is fatal for the unit that hit it: a unit that cannot
/// persist its progress must stop rather than run ahead of its record.
#[derive(Debug)]
pub enum StoreError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Record written by an incompatible version
    FormatVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    /// Record parsed but breaks an invariant or sits at the wrong address
    Invalid { path: PathBuf, reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "IO on {}: {source}", path.display()),
            Self::Json { path, source } => write!(f, "bad JSON in {}: {source}", path.display()),
            Self::FormatVersion {
                path,
                found,
                expected,
            } => write!(
                f,
                "{}: format_version {found} != supported {expected}",
                path.display()
            ),
            Self::Invalid { path, reason } => write!(f, "{}: {reason}", path.display()),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::FormatVersion { .. } | Self::Invalid { .. } => None,
        }
    }
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Disk full: nothing will succeed until an operator frees space
    pub fn is_storage_full(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::StorageFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn display_io_includes_path() {
        let err = StoreError::io(
            "/tmp/checkpoint_T_1.json",
            std::io::Error::new(ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("checkpoint_T_1.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn storage_full_detected() {
        let err = StoreError::io("x", std::io::Error::new(ErrorKind::StorageFull, "full"));
        assert!(err.is_storage_full());
        let err = StoreError::io("x", std::io::Error::other("other"));
        assert!(!err.is_storage_full());
    }

    #[test]
    fn version_mismatch_message() {
        let err = StoreError::FormatVersion {
            path: "c.json".into(),
            found: 7,
            expected: 1,
        };
        assert!(err.to_string().contains("format_version 7"));
    }
}
