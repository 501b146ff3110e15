//! Map Run identity and the reentrancy registry
//!
//! A Distributed Map invocation runs as a Map Run: its own event
//! recorder (own id space) and a stable identity derived from the
//! owning execution and state name. The registry guarantees that
//! re-invoking the same logical Map state — for example through a Catch
//! loop after a tolerance failure — resumes the existing Map Run
//! instead of minting a duplicate.

use crate::recorder::EventRecorder;
use stateline_types::{MapRunId, MapRunKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One Distributed Map Run.
pub struct MapRun {
    pub id: MapRunId,
    pub key: MapRunKey,
    pub label: Option<String>,
    /// Iteration events live here, in the run's own id space.
    pub recorder: Arc<EventRecorder>,
}

impl MapRun {
    fn new(key: MapRunKey, label: Option<String>) -> Self {
        Self {
            id: MapRunId::generate(),
            key,
            label,
            recorder: Arc::new(EventRecorder::new()),
        }
    }

    /// The identifier written into result-writer manifests.
    pub fn arn(&self) -> String {
        match &self.label {
            Some(label) => format!("mapRun/{}/{}", label, self.id),
            None => format!("mapRun/{}", self.id),
        }
    }
}

/// Process-wide index of live Map Runs keyed by [`MapRunKey`].
#[derive(Default)]
pub struct MapRunRegistry {
    runs: Mutex<HashMap<MapRunKey, Arc<MapRun>>>,
}

impl MapRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The Map Run for `key`, creating it on first use. Returns whether
    /// an existing run was resumed.
    pub fn obtain(&self, key: MapRunKey, label: Option<String>) -> (Arc<MapRun>, bool) {
        let mut runs = self.runs.lock().expect("registry lock poisoned");
        if let Some(existing) = runs.get(&key) {
            return (Arc::clone(existing), true);
        }
        let run = Arc::new(MapRun::new(key.clone(), label));
        runs.insert(key, Arc::clone(&run));
        (run, false)
    }

    /// Drop a run after it completes successfully. Failed runs stay
    /// registered so a re-entry resumes them.
    pub fn complete(&self, key: &MapRunKey) -> Option<Arc<MapRun>> {
        self.runs.lock().expect("registry lock poisoned").remove(key)
    }

    pub fn get(&self, key: &MapRunKey) -> Option<Arc<MapRun>> {
        self.runs.lock().expect("registry lock poisoned").get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
