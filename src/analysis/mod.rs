//! Per-volume analysis: pluggable strategy and dispatch
//!
//! The dispatcher consumes completed volumes in completion order and runs
//! the injected [`VolumeAnalysis`] on each, exactly once per volume, writing
//! exactly one result per volume index. An analysis that errors or panics
//! becomes a failure result, never a crash of the engine.

pub mod roi;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::error::{Result, SliceLinkError};
use crate::results::{AnalysisOutcome, AnalysisValues, ResultsWriter, VolumeResult};
use crate::volume::Volume;

pub use roi::{RoiAverage, RoiMask, RoiMedian};

/// Compute one structured result from one complete 3D volume
///
/// Implementations are strategy objects injected at engine construction: a
/// built-in ROI summary, or any caller-supplied type honoring this
/// signature. Closures work directly:
///
/// ```
/// use slicelink::analysis::VolumeAnalysis;
/// use slicelink::results::AnalysisValues;
/// use serde_json::json;
///
/// let peak = |vol: &slicelink::volume::Volume| -> slicelink::error::Result<AnalysisValues> {
///     let mut out = AnalysisValues::new();
///     out.insert("peak".to_string(), json!(vol.data().iter().max().copied()));
///     Ok(out)
/// };
/// fn assert_analysis<A: VolumeAnalysis>(_a: &A) {}
/// assert_analysis(&peak);
/// ```
pub trait VolumeAnalysis: Send + Sync {
    /// Analyze one volume, returning its key/value result fields
    fn analyze(&self, vol: &Volume) -> Result<AnalysisValues>;
}

impl<F> VolumeAnalysis for F
where
    F: Fn(&Volume) -> Result<AnalysisValues> + Send + Sync,
{
    fn analyze(&self, vol: &Volume) -> Result<AnalysisValues> {
        self(vol)
    }
}

/// Runs the injected analysis over each completed volume and writes results
///
/// One dispatcher per session; it owns the session's [`ResultsWriter`] and
/// returns it when the volume channel closes, keeping the single-writer
/// discipline enforced by ownership.
pub struct AnalysisDispatcher {
    analysis: Arc<dyn VolumeAnalysis>,
    writer: ResultsWriter,
    /// Dispatches slower than this are surfaced as lag warnings
    warn_after: Duration,
}

impl AnalysisDispatcher {
    pub fn new(
        analysis: Arc<dyn VolumeAnalysis>,
        writer: ResultsWriter,
        warn_after: Duration,
    ) -> Self {
        AnalysisDispatcher {
            analysis,
            writer,
            warn_after,
        }
    }

    /// Consume volumes until the sender side closes, then hand the writer
    /// back
    pub async fn run(mut self, mut rx: UnboundedReceiver<Volume>) -> ResultsWriter {
        while let Some(volume) = rx.recv().await {
            self.dispatch(volume);
        }
        info!(results = self.writer.len(), "dispatcher drained");
        self.writer
    }

    /// Analyze one volume and store its result
    pub fn dispatch(&mut self, volume: Volume) {
        let vol = volume.vol;
        let started = Instant::now();

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.analysis.analyze(&volume))) {
            Ok(Ok(values)) => AnalysisOutcome::Success(values),
            Ok(Err(err)) => {
                warn!(vol, error = %err, "analysis failed");
                AnalysisOutcome::Failed(err.to_string())
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                warn!(vol, detail = %detail, "analysis panicked");
                AnalysisOutcome::Failed(detail)
            }
        };

        let elapsed = started.elapsed();
        if elapsed > self.warn_after {
            // results are now lagging behind real time; operational, not fatal
            warn!(vol, elapsed_ms = elapsed.as_millis() as u64, "analysis slower than budget");
        } else {
            debug!(vol, elapsed_ms = elapsed.as_millis() as u64, "analysis done");
        }

        let result = VolumeResult {
            vol,
            outcome,
            completed_at: volume.completed_at,
        };
        if let Err(err) = self.writer.insert(result) {
            // write-once violation indicates a dispatch bug; first write wins
            warn!(vol, error = %err, "result discarded");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "analysis panicked".to_string()
    }
}

/// Convenience constructor for an analysis failure
pub fn analysis_error(detail: impl Into<String>) -> SliceLinkError {
    SliceLinkError::AnalysisFailed(detail.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ResultsStore;
    use crate::volume::{Volume, VolumeDims};
    use serde_json::json;

    fn volume(vol: u32) -> Volume {
        let dims = VolumeDims { x: 2, y: 2, z: 2 };
        Volume::from_raw(vol, dims, vec![10; dims.voxels_per_volume()])
    }

    fn dispatcher(
        analysis: Arc<dyn VolumeAnalysis>,
    ) -> (AnalysisDispatcher, crate::results::ResultsReader) {
        let store = ResultsStore::new();
        let reader = store.reader();
        let writer = store.begin_session();
        (
            AnalysisDispatcher::new(analysis, writer, Duration::from_secs(1)),
            reader,
        )
    }

    #[test]
    fn test_successful_dispatch_stores_success() {
        let analysis = Arc::new(|vol: &Volume| -> Result<AnalysisValues> {
            let mut out = AnalysisValues::new();
            out.insert("first".to_string(), json!(vol.data()[0]));
            Ok(out)
        });
        let (mut dispatcher, reader) = dispatcher(analysis);
        dispatcher.dispatch(volume(0));

        let result = reader.lookup(0).unwrap();
        match &result.outcome {
            AnalysisOutcome::Success(values) => assert_eq!(values["first"], json!(10)),
            AnalysisOutcome::Failed(_) => panic!("expected success"),
        }
    }

    #[test]
    fn test_error_becomes_failure_result() {
        let analysis =
            Arc::new(|_: &Volume| -> Result<AnalysisValues> { Err(analysis_error("no mask overlap")) });
        let (mut dispatcher, reader) = dispatcher(analysis);
        dispatcher.dispatch(volume(4));

        let result = reader.lookup(4).unwrap();
        assert!(matches!(result.outcome, AnalysisOutcome::Failed(_)));
    }

    #[test]
    fn test_panic_becomes_failure_result() {
        let analysis = Arc::new(|_: &Volume| -> Result<AnalysisValues> {
            panic!("user script exploded")
        });
        let (mut dispatcher, reader) = dispatcher(analysis);
        dispatcher.dispatch(volume(1));

        match &reader.lookup(1).unwrap().outcome {
            AnalysisOutcome::Failed(detail) => assert!(detail.contains("exploded")),
            AnalysisOutcome::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_failure_does_not_stop_later_volumes() {
        let analysis = Arc::new(|vol: &Volume| -> Result<AnalysisValues> {
            if vol.vol == 0 {
                Err(analysis_error("bad volume"))
            } else {
                Ok(AnalysisValues::new())
            }
        });
        let (mut dispatcher, reader) = dispatcher(analysis);
        dispatcher.dispatch(volume(0));
        dispatcher.dispatch(volume(1));

        assert!(matches!(
            reader.lookup(0).unwrap().outcome,
            AnalysisOutcome::Failed(_)
        ));
        assert!(matches!(
            reader.lookup(1).unwrap().outcome,
            AnalysisOutcome::Success(_)
        ));
    }

    #[tokio::test]
    async fn test_run_drains_channel_and_returns_writer() {
        let analysis =
            Arc::new(|_: &Volume| -> Result<AnalysisValues> { Ok(AnalysisValues::new()) });
        let store = ResultsStore::new();
        let reader = store.reader();
        let writer = store.begin_session();
        let dispatcher = AnalysisDispatcher::new(analysis, writer, Duration::from_secs(1));

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatcher.run(rx));
        tx.send(volume(0)).unwrap();
        tx.send(volume(1)).unwrap();
        drop(tx);

        let writer = handle.await.unwrap();
        assert_eq!(writer.len(), 2);
        assert!(reader.lookup(0).is_some());
        assert!(reader.lookup(1).is_some());
    }
}
