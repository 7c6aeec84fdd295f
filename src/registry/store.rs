//! Durable storage of the exposure collection.
//!
//! The whole collection is written as one JSON object keyed by exposure id.
//! Writes go to a sibling temp file that is flushed and renamed over the
//! destination, so readers only ever observe a complete file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::{Exposure, ExposureId};
use crate::errors::{Error, Result};

pub type ExposureMap = BTreeMap<ExposureId, Exposure>;

#[derive(Debug, Clone)]
pub struct ExposureStore {
    path: PathBuf,
}

impl ExposureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read the persisted collection. A missing file is an empty collection.
    pub async fn load(&self) -> Result<ExposureMap> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted exposures, starting empty");
                return Ok(ExposureMap::new());
            }
            Err(e) => {
                return Err(Error::persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let raw: BTreeMap<String, Exposure> = serde_json::from_slice(&data).map_err(|e| {
            Error::persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        let mut exposures = ExposureMap::new();
        for (key, exposure) in raw {
            if key != exposure.id.as_str() {
                warn!(key = %key, exposure_id = %exposure.id, "Persisted key does not match exposure id, using id");
            }
            exposures.insert(exposure.id.clone(), exposure);
        }
        Ok(exposures)
    }

    /// Atomically replace the persisted collection.
    pub async fn save(&self, exposures: &ExposureMap) -> Result<()> {
        let data = serde_json::to_vec_pretty(exposures)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::persistence(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let tmp_path = self.temp_path();
        self.write_temp(&tmp_path, &data).await.map_err(|e| {
            Error::persistence(format!("failed to write {}: {}", tmp_path.display(), e))
        })?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::persistence(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        debug!(path = %self.path.display(), exposures = exposures.len(), bytes = data.len(), "Persisted exposures");
        Ok(())
    }

    async fn write_temp(&self, tmp_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }
}
