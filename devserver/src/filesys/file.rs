//! Single-file reads and writes

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DevServerError;

/// A local file: a config, a minidump or a saved update log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, used as the upload name for minidumps
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub async fn read_string(&self) -> Result<String, DevServerError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, DevServerError> {
        Ok(fs::read(&self.path).await?)
    }

    /// Parse the file as JSON; syntax errors name the file
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DevServerError> {
        let contents = self.read_string().await?;
        serde_json::from_str(&contents).map_err(|e| {
            DevServerError::Configuration(format!("{}: {}", self.path.display(), e))
        })
    }

    /// Replace the file with `contents`, creating parent directories
    pub async fn write_string(&self, contents: &str) -> Result<(), DevServerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
