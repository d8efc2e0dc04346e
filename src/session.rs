use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use peg_core::{TrialInstance, TrialResult};
use peg_experiment::RunConfig;
use peg_sink::{Delivery, FallbackSink, LocalSink, ResultArtifact, ResultSink};
use std::path::PathBuf;
use tracing::info;

/// A compiled sequence ready to be presented, plus where its results go.
pub struct Session {
    pub sequence: Vec<TrialInstance>,
    pub config: RunConfig,
    pub save_endpoint: Option<String>,
    pub out_dir: PathBuf,
}

impl Session {
    /// Hands the finished run to the sink. Called once per run.
    pub fn save(
        &self,
        results: Vec<TrialResult>,
        started_at: Option<&str>,
        finished_at: DateTime<Utc>,
        environment_info: String,
    ) -> Result<Delivery> {
        let sink = FallbackSink::from_endpoint(
            self.save_endpoint.as_deref(),
            LocalSink::new(&self.out_dir),
        )
        .context("failed to set up the result sink")?;

        let mut artifact = ResultArtifact::new(
            finished_at,
            &mut rand::rng(),
            environment_info,
            self.config.randomize_sections,
            self.config.repetitions,
            results,
        );
        if let Some(started_at) = started_at {
            artifact = artifact.with_started_at(started_at);
        }
        let delivery = sink
            .deliver(&artifact)
            .with_context(|| format!("failed to save results of {}", artifact.experiment_id))?;
        info!(experiment_id = %artifact.experiment_id, ?delivery, "run saved");
        Ok(delivery)
    }
}

/// Platform description recorded with every result artifact.
pub fn environment_info(presenter: &str) -> String {
    format!(
        "peg {} ({presenter}; {} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Text of the closing screen, with the sink's notice if it had to fall back.
pub fn completion_message(delivery: &Delivery) -> String {
    let mut message = String::from("Experiment complete. Thank you!");
    if let Some(notice) = delivery.notice() {
        message.push_str("\n\n");
        message.push_str(notice);
    }
    message
}
