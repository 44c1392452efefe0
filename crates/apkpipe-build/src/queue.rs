use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle};
use tracing::debug;

use crate::config::BuildRequest;
use crate::pipeline::{BuildPipeline, BuildResult};

type Slot = Arc<AsyncMutex<()>>;
type Slots = Arc<Mutex<HashMap<PathBuf, Slot>>>;

/// Hands builds to the pipeline on background tasks, one at a time per
/// project. Builds of different projects may overlap.
#[derive(Clone)]
pub struct BuildQueue {
    pipeline: Arc<BuildPipeline>,
    slots: Slots,
}

impl BuildQueue {
    pub fn new(pipeline: BuildPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The returned handle resolves once the build has run. A later submission
    /// for the same project waits until this one finishes.
    pub fn submit(&self, req: BuildRequest) -> JoinHandle<BuildResult> {
        let key = project_key(&req.project_root);
        let slot = self.slot(key.clone());
        let slots = self.slots.clone();
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let turn = slot.clone().lock_owned().await;
            debug!("build slot acquired for {}", req.project_root.display());
            let result = pipeline.run(&req).await;
            drop(turn);
            release_slot(&slots, &key, slot);
            result
        })
    }

    pub fn is_busy(&self, project_root: &Path) -> bool {
        let key = project_key(project_root);
        let slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .get(&key)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    fn slot(&self, key: PathBuf) -> Slot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Forgets the slot once no queued or running build still holds it. Clones
/// are only taken under the map lock, so the count cannot grow while we look.
fn release_slot(slots: &Slots, key: &Path, slot: Slot) {
    let mut slots = slots
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let last_holder = slots
        .get(key)
        .is_some_and(|kept| Arc::ptr_eq(kept, &slot) && Arc::strong_count(&slot) == 2);
    if last_holder {
        slots.remove(key);
    }
}

/// Different spellings of the same directory share one slot.
fn project_key(project_root: &Path) -> PathBuf {
    fs::canonicalize(project_root).unwrap_or_else(|_| project_root.to_path_buf())
}
