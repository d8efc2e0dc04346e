use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::spec::TrialSpec;

/// How a compiled trial was produced from its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grouping", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Grouping {
    Fixed { block_repetition: u32 },
    Sectioned { section: i64, section_repetition: u32 },
}

/// One concrete presentation unit of a compiled sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialInstance {
    pub spec: Arc<TrialSpec>,
    /// 1-based global repetition of the whole sequence.
    pub repetition: u32,
    #[serde(flatten)]
    pub grouping: Grouping,
    /// Zero-based index in the compiled sequence.
    pub sequence_position: usize,
}

/// Recorded outcome of one completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    pub sequence_position: usize,
    pub block: i64,
    pub repetition: u32,
    #[serde(flatten)]
    pub grouping: Grouping,
    pub stimulus: String,
    pub correct_response: Option<String>,
    pub actual_response: Option<String>,
    pub response_time_ms: f64,
    /// `None` when the trial has no correct response.
    pub is_correct: Option<bool>,
    pub timed_out: bool,
    pub feedback_shown: Option<String>,
    /// ISO-8601, UTC.
    pub timestamp: String,
}

impl TrialResult {
    pub fn for_instance(instance: &TrialInstance, timestamp: String) -> Self {
        Self {
            sequence_position: instance.sequence_position,
            block: instance.spec.block,
            repetition: instance.repetition,
            grouping: instance.grouping,
            stimulus: instance.spec.stimulus.clone(),
            correct_response: instance.spec.correct_response.clone(),
            actual_response: None,
            response_time_ms: 0.0,
            is_correct: None,
            timed_out: false,
            feedback_shown: None,
            timestamp,
        }
    }
}
