//! Root strategies.
//!
//! A `Loader` answers "does this root contain X" for exactly one root. The
//! class path realizes roots into loaders on demand and never drops them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, warn};

use crate::archive::ArchiveLoader;
use crate::config::LoaderOptions;
use crate::directory::DirectoryLoader;
use crate::error::{LoaderError, Result};
use crate::index::IndexData;
use crate::pool::HandlePool;
use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    Directory,
    Archive,
}

pub trait Loader: Send + Sync + fmt::Debug {
    fn root(&self) -> &Path;

    fn kind(&self) -> LoaderKind;

    fn get_resource(&self, name: &str) -> Option<Resource>;

    /// Bloom pre-check on the short name. `false` means definitely absent;
    /// `true` until the loader has built its index.
    fn contains_name(&self, name: &str) -> bool;

    /// Builds (once) and returns this loader's index data.
    fn build_index(&self) -> Result<Arc<IndexData>>;

    /// Roots this one pulls in, searched right after it.
    fn dependent_roots(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Realizes one root. Missing or unreadable roots yield no loader.
pub fn open_loader(
    root: &Path,
    options: &LoaderOptions,
    pool: &Arc<HandlePool>,
) -> Option<Arc<dyn Loader>> {
    let metadata = match std::fs::metadata(root) {
        Ok(m) => m,
        Err(e) => {
            report_failure(
                &LoaderError::io(root, e),
                options.log_missing_archive_as_error,
            );
            return None;
        }
    };

    let access = options.access_control_for(root);
    if metadata.is_dir() {
        Some(Arc::new(DirectoryLoader::new(root.to_path_buf(), options, access)))
    } else {
        Some(Arc::new(ArchiveLoader::new(
            root.to_path_buf(),
            options,
            Arc::clone(pool),
            access,
        )))
    }
}

pub(crate) fn report_failure(failure: &LoaderError, as_error: bool) {
    if as_error {
        error!(error = %failure, "classpath root unavailable");
    } else {
        warn!(error = %failure, "classpath root unavailable");
    }
}
