//! Per-file error kinds.
//!
//! Every error raised while georeferencing a single input is a [`GeorefError`].
//! The batch driver converts them into failure records; they never abort a run.
//! Configuration-level problems are reported through `anyhow` instead.

use serde::Serialize;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, GeorefError>;

/// Error raised by one file's load → transform → resample → write pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GeorefError {
    /// The source raster could not be read or decoded.
    #[error("cannot load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// Invalid dimensions, empty bounding box, collinear or too few control points.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// The requested output grid cannot be produced.
    #[error("invalid resample target: {0}")]
    Resample(String),

    /// The destination could not be written, or the raster is inconsistent.
    #[error("cannot write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },
}

/// Stable label for each error variant, used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Load,
    DegenerateGeometry,
    Resample,
    Write,
    /// The worker running the item panicked.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Load => "LoadError",
            ErrorKind::DegenerateGeometry => "DegenerateGeometryError",
            ErrorKind::Resample => "ResampleError",
            ErrorKind::Write => "WriteError",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(label)
    }
}

impl GeorefError {
    pub fn load(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::Load {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateGeometry(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GeorefError::Load { .. } => ErrorKind::Load,
            GeorefError::DegenerateGeometry(_) => ErrorKind::DegenerateGeometry,
            GeorefError::Resample(_) => ErrorKind::Resample,
            GeorefError::Write { .. } => ErrorKind::Write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        let err = GeorefError::load("maps/a.jpg", "truncated");
        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(err.kind().to_string(), "LoadError");

        let err = GeorefError::degenerate("width is zero");
        assert_eq!(err.kind(), ErrorKind::DegenerateGeometry);
        assert!(err.to_string().contains("width is zero"));
    }

    #[test]
    fn test_display_includes_path() {
        let err = GeorefError::write("/out/a.tif", "permission denied");
        let display = err.to_string();
        assert!(display.contains("/out/a.tif"));
        assert!(display.contains("permission denied"));
        assert_eq!(err.kind().to_string(), "WriteError");
    }
}
