//! Session-lifetime results table: one writer, many wait-free readers
//!
//! The dispatcher is the only writer. It keeps a private map and, after each
//! append, publishes an immutable snapshot behind an `Arc`; readers clone the
//! current snapshot pointer and look up against it. A reader therefore never
//! waits on an in-progress analysis or insertion, and never observes a
//! half-written result. Lookups answer immediately: a missing key means "no
//! result yet", never "wait".

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::{Result, SliceLinkError};
use crate::results::VolumeResult;

type Snapshot = Arc<HashMap<u32, Arc<VolumeResult>>>;

/// Process-lifetime handle from which per-session writers and any number of
/// readers are created
///
/// The lock inside is held only long enough to swap or clone the snapshot
/// pointer; the map itself is immutable once published.
pub struct ResultsStore {
    shared: Arc<RwLock<Snapshot>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        ResultsStore {
            shared: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
        }
    }

    /// A reader handle; cheap to clone, one per results-client task
    pub fn reader(&self) -> ResultsReader {
        ResultsReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Begin a new session's table: publishes an empty snapshot and returns
    /// the session's single writer
    ///
    /// Results from the previous session stay queryable until this is
    /// called, so a scanner disconnect never cuts off clients still reading
    /// the finished run.
    pub fn begin_session(&self) -> ResultsWriter {
        let map = HashMap::new();
        if let Ok(mut guard) = self.shared.write() {
            *guard = Arc::new(map);
        }
        info!("results table reset for new session");
        ResultsWriter {
            shared: Arc::clone(&self.shared),
            map: HashMap::new(),
        }
    }
}

impl Default for ResultsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Single writer for one session's table
///
/// Owned by the analysis dispatcher; creating a second writer for the same
/// store starts a new session's table, so exactly one is alive at a time.
pub struct ResultsWriter {
    shared: Arc<RwLock<Snapshot>>,
    map: HashMap<u32, Arc<VolumeResult>>,
}

impl ResultsWriter {
    /// Append one result and publish the updated snapshot
    ///
    /// # Errors
    ///
    /// [`SliceLinkError::DuplicateResult`] if the volume index already has a
    /// result; the first write wins and the table is unchanged.
    pub fn insert(&mut self, result: VolumeResult) -> Result<()> {
        let vol = result.vol;
        if self.map.contains_key(&vol) {
            return Err(SliceLinkError::DuplicateResult { vol });
        }
        self.map.insert(vol, Arc::new(result));
        let snapshot: Snapshot = Arc::new(self.map.clone());
        if let Ok(mut guard) = self.shared.write() {
            *guard = snapshot;
        }
        debug!(vol, total = self.map.len(), "result stored");
        Ok(())
    }

    /// Results written so far this session
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Read-side handle: lookups against the latest published snapshot
#[derive(Clone)]
pub struct ResultsReader {
    shared: Arc<RwLock<Snapshot>>,
}

impl ResultsReader {
    /// Look up the result for a volume index
    ///
    /// Returns `None` when no result is stored (not yet computed, or out of
    /// range) - never blocks waiting for a future write.
    pub fn lookup(&self, vol: u32) -> Option<Arc<VolumeResult>> {
        let snapshot = match self.shared.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(_) => return None,
        };
        snapshot.get(&vol).cloned()
    }

    /// Number of results visible to readers right now
    pub fn len(&self) -> usize {
        self.shared.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{AnalysisOutcome, AnalysisValues};
    use serde_json::json;
    use std::time::SystemTime;

    fn result(vol: u32, value: f64) -> VolumeResult {
        let mut values = AnalysisValues::new();
        values.insert("average".to_string(), json!(value));
        VolumeResult {
            vol,
            outcome: AnalysisOutcome::Success(values),
            completed_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_lookup_before_any_write_is_none() {
        let store = ResultsStore::new();
        let reader = store.reader();
        assert!(reader.lookup(0).is_none());
    }

    #[test]
    fn test_reader_sees_insert() {
        let store = ResultsStore::new();
        let reader = store.reader();
        let mut writer = store.begin_session();
        writer.insert(result(0, 1.5)).unwrap();
        let found = reader.lookup(0).unwrap();
        assert_eq!(found.vol, 0);
        assert!(reader.lookup(1).is_none());
    }

    #[test]
    fn test_write_once_per_key() {
        let store = ResultsStore::new();
        let mut writer = store.begin_session();
        writer.insert(result(2, 1.0)).unwrap();
        let dup = writer.insert(result(2, 9.0));
        assert!(matches!(
            dup,
            Err(SliceLinkError::DuplicateResult { vol: 2 })
        ));
        // first write wins
        let reader = store.reader();
        match &reader.lookup(2).unwrap().outcome {
            AnalysisOutcome::Success(values) => {
                assert_eq!(values["average"], json!(1.0));
            }
            AnalysisOutcome::Failed(_) => panic!("expected success"),
        }
    }

    #[test]
    fn test_new_session_empties_table() {
        let store = ResultsStore::new();
        let reader = store.reader();
        let mut writer = store.begin_session();
        writer.insert(result(0, 1.0)).unwrap();
        assert_eq!(reader.len(), 1);

        let _next = store.begin_session();
        assert!(reader.lookup(0).is_none());
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn test_results_survive_writer_drop() {
        let store = ResultsStore::new();
        let reader = store.reader();
        {
            let mut writer = store.begin_session();
            writer.insert(result(0, 1.0)).unwrap();
            writer.insert(result(1, 2.0)).unwrap();
        }
        assert!(reader.lookup(0).is_some());
        assert!(reader.lookup(1).is_some());
    }

    #[test]
    fn test_snapshot_isolation_across_clones() {
        let store = ResultsStore::new();
        let reader = store.reader();
        let mut writer = store.begin_session();
        writer.insert(result(0, 1.0)).unwrap();

        let held = reader.lookup(0).unwrap();
        writer.insert(result(1, 2.0)).unwrap();
        // the result handed out earlier is unaffected by later appends
        assert_eq!(held.vol, 0);
        assert_eq!(reader.len(), 2);
    }
}
