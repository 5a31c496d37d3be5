//! Per-volume analysis results and their session-lifetime store

pub mod store;

use std::time::SystemTime;

use serde_json::{json, Map, Value};

pub use store::{ResultsReader, ResultsStore, ResultsWriter};

/// Key/value fields produced by an analysis for one volume
pub type AnalysisValues = Map<String, Value>;

/// Outcome of analyzing one volume
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// Analysis produced its fields
    Success(AnalysisValues),
    /// Analysis errored or panicked; detail goes to the operator log, the
    /// wire reply carries only the flag
    Failed(String),
}

/// One stored result, written exactly once per volume index
#[derive(Debug, Clone)]
pub struct VolumeResult {
    /// Volume index (0-based)
    pub vol: u32,
    pub outcome: AnalysisOutcome,
    /// Wall-clock time the volume reached Complete
    pub completed_at: SystemTime,
}

impl VolumeResult {
    /// Results-protocol reply for this result
    ///
    /// Success replies flatten the analysis fields next to the flags:
    /// `{"foundResults": true, "success": true, "average": 1021.5}`.
    /// Failure replies carry only the flags.
    pub fn to_reply(&self) -> Value {
        match &self.outcome {
            AnalysisOutcome::Success(values) => {
                let mut reply = Map::new();
                reply.insert("foundResults".to_string(), Value::Bool(true));
                reply.insert("success".to_string(), Value::Bool(true));
                for (key, value) in values {
                    reply.insert(key.clone(), value.clone());
                }
                Value::Object(reply)
            }
            AnalysisOutcome::Failed(_) => json!({
                "foundResults": true,
                "success": false,
            }),
        }
    }
}

/// Results-protocol reply for a volume with no stored result
pub fn not_found_reply() -> Value {
    json!({ "foundResults": false })
}
