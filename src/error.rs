use std::path::PathBuf;

/// Failures reported by the history buffer and its persistence layer.
///
/// Only [`HistoryError::InvalidCapacity`] is fatal. Everything else leaves the
/// buffer usable: the caller continues with an empty or stale history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("History capacity must be greater than zero")]
    InvalidCapacity,
    #[error("I/O error on history file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid history file {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },
    #[error("History file {} uses the old binary format, it will be replaced on next save", path.display())]
    LegacyFormat { path: PathBuf },
}

impl HistoryError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        HistoryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(path: &std::path::Path, reason: impl Into<String>) -> Self {
        HistoryError::Format {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, HistoryError::InvalidCapacity)
    }
}
