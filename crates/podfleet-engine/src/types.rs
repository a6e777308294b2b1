//! Engine job types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Engine-assigned identifier for a submitted job.
pub type JobId = String;

/// Execution state of a job as seen in the engine's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    /// The engine gave up on the job; the payload is its error message.
    Failed(String),
}

/// One file produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAsset {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Engine storage bucket (`output`, `temp`, ...).
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

/// A job's entry in the engine history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHistory {
    pub state: JobState,
    pub outputs: Vec<OutputAsset>,
}

/// Validated job body sent to the engine.
///
/// Request parameters stay opaque everywhere else; they are only checked
/// here, right before submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitPayload {
    /// Node graph keyed by node id.
    pub graph: Map<String, Value>,
}

impl SubmitPayload {
    /// Accepts either `{"prompt": {...graph...}}` or a bare graph object.
    pub fn from_parameters(parameters: &Value) -> EngineResult<Self> {
        let object = parameters.as_object().ok_or_else(|| {
            EngineError::InvalidParameters("parameters must be a JSON object".to_string())
        })?;

        let graph = match object.get("prompt") {
            Some(Value::Object(graph)) => graph.clone(),
            Some(_) => {
                return Err(EngineError::InvalidParameters(
                    "\"prompt\" must be a JSON object".to_string(),
                ));
            }
            None => object.clone(),
        };

        if graph.is_empty() {
            return Err(EngineError::InvalidParameters(
                "workflow graph is empty".to_string(),
            ));
        }

        Ok(Self { graph })
    }
}
