//! # Harness Error Taxonomy
//!
//! Typed failures raised by the harness components. Application glue wraps
//! these in `anyhow::Error`; the variants exist so callers (and tests) can tell
//! a discovery failure from a launch failure without string matching.
//!
//! Recoverable conditions (warm-up network failures, process-group kill
//! rejection) never surface here: they are logged where they happen and the
//! run carries on.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the benchmark harness
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The watched file was not found at any candidate location
    #[error("could not find a target file; searched: {}", format_paths(.searched))]
    Discovery { searched: Vec<PathBuf> },

    /// The server command could not be spawned
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without a captured stdout pipe
    #[error("server process has no stdout pipe")]
    MissingStdout,

    #[error("failed to snapshot {}: {source}", .path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to mutate {}: {source}", .path.display())]
    Mutation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to restore {}: {source}", .path.display())]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither the group kill nor the direct kill went through
    #[error("failed to terminate server process {pid}: {source}")]
    Terminate {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_error_lists_searched_locations() {
        let err = HarnessError::Discovery {
            searched: vec![PathBuf::from("/a/page.tsx"), PathBuf::from("/b/page.tsx")],
        };
        let msg = err.to_string();
        assert!(msg.contains("/a/page.tsx"));
        assert!(msg.contains("/b/page.tsx"));
    }

    #[test]
    fn test_launch_error_keeps_source() {
        let err = HarnessError::Launch {
            command: "npm run dev".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "sh missing"),
        };
        assert!(err.to_string().contains("npm run dev"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
