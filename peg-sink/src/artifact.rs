use chrono::{DateTime, SecondsFormat, Utc};
use peg_core::TrialResult;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

const ID_PREFIX: &str = "exp_";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// The JSON document written once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultArtifact {
    pub experiment_id: String,
    /// ISO-8601, UTC, taken when the run finished.
    pub timestamp: String,
    /// ISO-8601, UTC, taken when the first trial was presented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Free-form description of the presenting environment.
    pub environment_info: String,
    pub randomized: bool,
    pub repetitions: u32,
    pub trials: Vec<TrialResult>,
}

impl ResultArtifact {
    pub fn new<R: Rng + ?Sized>(
        finished_at: DateTime<Utc>,
        rng: &mut R,
        environment_info: impl Into<String>,
        randomized: bool,
        repetitions: u32,
        trials: Vec<TrialResult>,
    ) -> Self {
        Self {
            experiment_id: new_experiment_id(finished_at, rng),
            timestamp: finished_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            started_at: None,
            environment_info: environment_info.into(),
            randomized,
            repetitions,
            trials,
        }
    }

    pub fn with_started_at(mut self, started_at: impl Into<String>) -> Self {
        self.started_at = Some(started_at.into());
        self
    }

    pub fn file_name(&self) -> String {
        artifact_file_name(&self.experiment_id)
    }

    pub fn to_json(&self) -> Result<String, SinkError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `exp_` followed by the millisecond timestamp in base 36 and four random
/// base-36 digits.
pub fn new_experiment_id<R: Rng + ?Sized>(at: DateTime<Utc>, rng: &mut R) -> String {
    let mut id = String::from(ID_PREFIX);
    id.push_str(&to_base36(at.timestamp_millis().max(0) as u64));
    for _ in 0..4 {
        id.push(BASE36[rng.random_range(0..BASE36.len())] as char);
    }
    id
}

/// Ids are `exp_` plus ASCII letters and digits, which makes them safe file name parts.
pub fn is_valid_experiment_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric()))
}

pub fn artifact_file_name(experiment_id: &str) -> String {
    format!("experiment_data_{experiment_id}.json")
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn ids_encode_the_finish_time() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let id = new_experiment_id(at, &mut rng);
        assert!(id.starts_with("exp_loyw3v28"));
        assert_eq!(id.len(), "exp_loyw3v28".len() + 4);
        assert!(is_valid_experiment_id(&id));
    }

    #[test]
    fn id_validation_rejects_path_tricks() {
        assert!(!is_valid_experiment_id("exp_"));
        assert!(!is_valid_experiment_id("exp_../x"));
        assert!(!is_valid_experiment_id("run_abc"));
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn artifact_json_uses_camel_case() {
        let at = DateTime::from_timestamp_millis(0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let artifact = ResultArtifact::new(at, &mut rng, "console", true, 2, Vec::new());
        let json: serde_json::Value = serde_json::from_str(&artifact.to_json().unwrap()).unwrap();
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00.000Z");
        assert_eq!(json["environmentInfo"], "console");
        assert_eq!(json["randomized"], true);
        assert_eq!(json["repetitions"], 2);
        assert!(json["trials"].as_array().unwrap().is_empty());
        assert!(json.get("startedAt").is_none());
        assert_eq!(
            artifact.file_name(),
            format!("experiment_data_{}.json", artifact.experiment_id)
        );
    }

    #[test]
    fn start_time_is_recorded_next_to_the_finish_time() {
        let at = DateTime::from_timestamp_millis(90_000).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let artifact = ResultArtifact::new(at, &mut rng, "window", false, 1, Vec::new())
            .with_started_at("1970-01-01T00:00:30.000Z");
        let json: serde_json::Value = serde_json::from_str(&artifact.to_json().unwrap()).unwrap();
        assert_eq!(json["startedAt"], "1970-01-01T00:00:30.000Z");
        assert_eq!(json["timestamp"], "1970-01-01T00:01:30.000Z");
    }
}
