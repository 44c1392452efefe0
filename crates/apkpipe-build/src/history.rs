use std::{
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use apkpipe_util::{now_millis, read_json_or_default, state_file_path, write_json_atomic};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::pipeline::BuildResult;
use crate::signing::KeystoreKind;

const STATE_FILE_NAME: &str = "builds.json";
pub const MAX_BUILD_RECORDS: usize = 50;

#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct BuildState {
    records: Vec<BuildRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildRecord {
    pub build_id: String,
    pub created_at_unix_millis: i64,
    pub project_path: String,
    pub variant: String,
    pub success: bool,
    pub package_path: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub failed_stage: Option<u8>,
    pub message: String,
    pub keystore: String,
}

impl BuildRecord {
    pub fn from_result(result: &BuildResult) -> Self {
        BuildRecord {
            build_id: Uuid::new_v4().to_string(),
            created_at_unix_millis: now_millis(),
            project_path: result.project_root.to_string_lossy().to_string(),
            variant: result.variant.label().to_string(),
            success: result.success,
            package_path: result
                .package
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            sha256: result.sha256.clone().unwrap_or_default(),
            size_bytes: result.size_bytes.unwrap_or_default(),
            failed_stage: result.failed_stage().map(|stage| stage.number()),
            message: result.message(),
            keystore: match result.keystore {
                Some(KeystoreKind::Custom) => "custom".into(),
                Some(KeystoreKind::Debug) => "debug".into(),
                None => String::new(),
            },
        }
    }
}

/// Newest-first list of finished builds kept in the state directory.
#[derive(Debug)]
pub struct BuildHistory {
    path: PathBuf,
    guard: Mutex<()>,
}

impl BuildHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn default_location() -> Self {
        Self::new(state_file_path(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Vec<BuildRecord> {
        read_json_or_default::<BuildState>(&self.path).records
    }

    pub fn recent(&self, limit: usize) -> Vec<BuildRecord> {
        let mut records = self.records();
        records.truncate(limit);
        records
    }

    pub fn record(&self, result: &BuildResult) -> io::Result<BuildRecord> {
        let record = BuildRecord::from_result(result);
        let _guard = self
            .guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut state = read_json_or_default::<BuildState>(&self.path);
        state.records.insert(0, record.clone());
        if state.records.len() > MAX_BUILD_RECORDS {
            state.records.truncate(MAX_BUILD_RECORDS);
        }
        write_json_atomic(&self.path, &state)?;
        Ok(record)
    }

    pub fn record_best_effort(&self, result: &BuildResult) {
        if let Err(err) = self.record(result) {
            warn!("Failed to persist build history: {}", err);
        }
    }
}
