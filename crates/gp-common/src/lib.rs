use serde::{Deserialize, Serialize};

pub mod logging;

/// A load-shedding stage change, as carried on the `stage` topic.
///
/// The wire form is the JSON object `{"stage": <int>}`. The event is transient:
/// the only durable copy of the stage is the integer held in memory by the
/// stage-owning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: u32,
}

impl StageEvent {
    pub fn new(stage: u32) -> Self {
        Self { stage }
    }

    /// Serialize to the wire form. A single u32 field cannot fail to serialize.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"stage\":{}}}", self.stage))
    }

    /// Parse the wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
