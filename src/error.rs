//! Error taxonomy for image assembly.
//!
//! Every variant is fatal to the current run. Stages return these; the
//! orchestrator records them per stage and blocks dependents.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Result alias used throughout the library.
pub type Result<T, E = AssemblyError> = std::result::Result<T, E>;

/// Errors raised while assembling a runtime image.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// An expected module archive does not exist.
    #[error("missing artifact for module '{module}' (checked {})", display_paths(.checked))]
    MissingArtifact {
        module: String,
        checked: Vec<PathBuf>,
    },

    /// Two configured entities claim the same identity.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// The base runtime, a runtime module or the script template directory
    /// is absent or unusable.
    #[error("{what} unavailable at '{}': {reason}", .path.display())]
    ResourceUnavailable {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// A read, write or copy could not complete.
    #[error("I/O failure at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration is malformed or holds an out-of-range value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The stage graph could not be ordered.
    #[error("stage graph error: {0}")]
    Graph(String),
}

impl AssemblyError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unavailable(what: &'static str, path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::ResourceUnavailable {
            what,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable label, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingArtifact { .. } => "missing-artifact",
            Self::ConfigConflict(_) => "configuration-conflict",
            Self::ResourceUnavailable { .. } => "resource-unavailable",
            Self::Io { .. } => "io-failure",
            Self::Config(_) => "invalid-configuration",
            Self::Graph(_) => "stage-graph",
        }
    }
}

/// Attach the offending path to raw I/O errors.
pub trait IoResultExt<T> {
    fn at_path(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at_path(self, path: &Path) -> Result<T> {
        self.map_err(|source| AssemblyError::io(path, source))
    }
}

impl From<walkdir::Error> for AssemblyError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        Self::Io {
            path,
            source: err.into(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("'{}'", p.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_names_module_and_paths() {
        let err = AssemblyError::MissingArtifact {
            module: "cli".into(),
            checked: vec![PathBuf::from("libs/cli.tar"), PathBuf::from("libs/cli.tar.zst")],
        };
        let msg = err.to_string();
        assert!(msg.contains("'cli'"));
        assert!(msg.contains("'libs/cli.tar'"));
        assert!(msg.contains("'libs/cli.tar.zst'"));
        assert_eq!(err.kind(), "missing-artifact");
    }

    #[test]
    fn at_path_wraps_io_error() {
        let result: io::Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = result.at_path(Path::new("/tmp/x")).unwrap_err();
        assert!(matches!(err, AssemblyError::Io { ref path, .. } if path == Path::new("/tmp/x")));
        assert!(err.to_string().contains("/tmp/x"));
    }
}
