use reqwest::blocking::Client;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::artifact::{ResultArtifact, is_valid_experiment_id};
use crate::error::SinkError;

/// Where an artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Remote {
        endpoint: String,
    },
    Local {
        path: PathBuf,
        /// Set when this is a fallback; shown to the participant.
        notice: Option<String>,
    },
}

impl Delivery {
    pub fn notice(&self) -> Option<&str> {
        match self {
            Delivery::Local { notice, .. } => notice.as_deref(),
            Delivery::Remote { .. } => None,
        }
    }
}

pub trait ResultSink {
    fn deliver(&self, artifact: &ResultArtifact) -> Result<Delivery, SinkError>;
}

/// Writes `experiment_data_<id>.json` into a directory.
#[derive(Debug, Clone)]
pub struct LocalSink {
    dir: PathBuf,
}

impl LocalSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ResultSink for LocalSink {
    fn deliver(&self, artifact: &ResultArtifact) -> Result<Delivery, SinkError> {
        if !is_valid_experiment_id(&artifact.experiment_id) {
            return Err(SinkError::InvalidId(artifact.experiment_id.clone()));
        }
        let json = artifact.to_json()?;
        let path = self.dir.join(artifact.file_name());
        fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&path, json))
            .map_err(|source| SinkError::Write {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), trials = artifact.trials.len(), "results saved");
        Ok(Delivery::Local { path, notice: None })
    }
}

/// POSTs the artifact as JSON. Any 2xx answer counts as saved.
#[derive(Debug, Clone)]
pub struct RemoteSink {
    endpoint: String,
    client: Client,
}

#[derive(Deserialize)]
struct ServerReply {
    message: Option<String>,
}

impl RemoteSink {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

    pub fn new(endpoint: impl Into<String>) -> Result<Self, SinkError> {
        Self::with_timeout(endpoint, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let endpoint = endpoint.into();
        let client = Client::builder()
            .user_agent(concat!("peg/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|source| SinkError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ResultSink for RemoteSink {
    fn deliver(&self, artifact: &ResultArtifact) -> Result<Delivery, SinkError> {
        let transport = |source: reqwest::Error| SinkError::Transport {
            endpoint: self.endpoint.clone(),
            source,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(artifact)
            .send()
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ServerReply>(&body)
                .ok()
                .and_then(|r| r.message)
                .unwrap_or(body);
            return Err(SinkError::Rejected {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                message,
            });
        }

        info!(endpoint = %self.endpoint, trials = artifact.trials.len(), "results sent");
        Ok(Delivery::Remote {
            endpoint: self.endpoint.clone(),
        })
    }
}

/// Tries the remote sink first and saves locally when that fails, so every
/// run yields exactly one artifact.
pub struct FallbackSink {
    remote: Option<Box<dyn ResultSink + Send>>,
    local: LocalSink,
}

impl FallbackSink {
    pub fn new(remote: Option<Box<dyn ResultSink + Send>>, local: LocalSink) -> Self {
        Self { remote, local }
    }

    pub fn local_only(local: LocalSink) -> Self {
        Self::new(None, local)
    }

    /// Builds the remote half from an endpoint URL, if one is configured.
    pub fn from_endpoint(endpoint: Option<&str>, local: LocalSink) -> Result<Self, SinkError> {
        let remote = match endpoint {
            Some(url) => Some(Box::new(RemoteSink::new(url)?) as Box<dyn ResultSink + Send>),
            None => None,
        };
        Ok(Self::new(remote, local))
    }
}

impl ResultSink for FallbackSink {
    fn deliver(&self, artifact: &ResultArtifact) -> Result<Delivery, SinkError> {
        let Some(remote) = &self.remote else {
            return self.local.deliver(artifact);
        };
        let err = match remote.deliver(artifact) {
            Ok(delivery) => return Ok(delivery),
            Err(err) => err,
        };

        warn!(error = %err, "remote save failed, saving locally");
        match self.local.deliver(artifact)? {
            Delivery::Local { path, .. } => {
                let notice = format!(
                    "Could not save results to the server ({err}). They were saved to {} instead.",
                    path.display()
                );
                Ok(Delivery::Local {
                    path,
                    notice: Some(notice),
                })
            }
            remote @ Delivery::Remote { .. } => Ok(remote),
        }
    }
}
