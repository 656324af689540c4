//! Locates the file the hot-reload variant mutates.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Candidate locations, relative to the app directory, in search order.
pub const CANDIDATES: &[&str] = &[
    "app/page.tsx",
    "page.tsx",
    "src/app/page.tsx",
    "pages/index.tsx",
];

/// Find the first existing candidate under `app_dir` and return it as an
/// absolute path.
pub fn discover_target(app_dir: &Path) -> HarnessResult<PathBuf> {
    let searched: Vec<PathBuf> = CANDIDATES.iter().map(|c| app_dir.join(c)).collect();
    for candidate in &searched {
        debug!("checking {}", candidate.display());
        if candidate.is_file() {
            return absolute(candidate);
        }
    }
    Err(HarnessError::Discovery { searched })
}

/// Validate an explicitly given target.
pub fn resolve_explicit(path: &Path) -> HarnessResult<PathBuf> {
    if path.is_file() {
        absolute(path)
    } else {
        Err(HarnessError::Discovery {
            searched: vec![path.to_path_buf()],
        })
    }
}

fn absolute(path: &Path) -> HarnessResult<PathBuf> {
    path.canonicalize()
        .map_err(|_| HarnessError::Discovery {
            searched: vec![path.to_path_buf()],
        })
}
