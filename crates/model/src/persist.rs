use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MODEL_FILE_NAME: &str = "category_model.json";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported model version {0}")]
    UnsupportedVersion(u32),
    #[error("Model persistence is disabled (no path configured)")]
    PersistenceDisabled,
}

pub type CounterMap = BTreeMap<String, BTreeMap<String, u64>>;

/// On-disk form of the classifier counters. Sorted maps keep the file stable
/// across saves of identical state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSnapshot {
    pub version: u32,
    pub saved_at: Option<DateTime<Utc>>,
    pub total_training_samples: u64,
    pub merchant_category_counts: CounterMap,
    pub keyword_category_counts: CounterMap,
    pub amount_range_category_counts: CounterMap,
    pub payment_channel_category_counts: CounterMap,
}

/// `<dir>/category_model.json`.
pub fn model_file_in(dir: &Path) -> PathBuf {
    dir.join(MODEL_FILE_NAME)
}

/// Writes `snapshot` next to `path` as `<path>.tmp`, then renames it over
/// `path`. Parent directories are created if missing.
pub fn write_snapshot(path: &Path, snapshot: &ModelSnapshot) -> Result<(), ModelError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let json = serde_json::to_vec_pretty(snapshot)?;
    if let Err(e) = std::fs::write(&tmp, &json).and_then(|_| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Reads a snapshot. A missing or empty file yields `Ok(None)`.
pub fn read_snapshot(path: &Path) -> Result<Option<ModelSnapshot>, ModelError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let snapshot: ModelSnapshot = serde_json::from_slice(&bytes)?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(ModelError::UnsupportedVersion(snapshot.version));
    }
    Ok(Some(snapshot))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| MODEL_FILE_NAME.into());
    name.push(".tmp");
    path.with_file_name(name)
}
