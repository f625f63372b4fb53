//! Job result directories

use std::path::{Path, PathBuf};

use crate::constants::AUTO_UPDATE_LOG_DIR;
use crate::filesys::file::File;

/// A local directory, typically a job's results directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// Where devserver auto-update logs for this job are saved
    pub fn autoupdate_logs(&self) -> Dir {
        self.subdir(AUTO_UPDATE_LOG_DIR)
    }
}
