//! Result artifacts and where they end up: a local JSON file, a remote
//! endpoint, or the remote endpoint with a local fallback.

pub mod artifact;
pub mod error;
pub mod sink;

pub use artifact::{ResultArtifact, artifact_file_name, is_valid_experiment_id, new_experiment_id};
pub use error::SinkError;
pub use sink::{Delivery, FallbackSink, LocalSink, RemoteSink, ResultSink};
