use peg_core::KEY_GRACE_MS;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::compiler::CompileOptions;
use crate::state::RuntimeSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Times the whole compiled sequence is repeated.
    pub repetitions: u32,
    pub randomize_sections: bool,
    /// Fixes the section shuffles; fresh entropy when unset.
    pub seed: Option<u64>,
    pub default_feedback_ms: u64,
    /// Closes the key window this long after onset on trials that also time
    /// out. `None` keeps keys open until the timeout.
    pub key_grace_ms: Option<u64>,
    pub image_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repetitions: 1,
            randomize_sections: true,
            seed: None,
            default_feedback_ms: 1000,
            key_grace_ms: Some(KEY_GRACE_MS),
            image_dir: PathBuf::from("images"),
        }
    }
}

impl RunConfig {
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            repetitions: self.repetitions,
            randomize_sections: self.randomize_sections,
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            default_feedback: Duration::from_millis(self.default_feedback_ms),
            key_grace: self.key_grace_ms.map(Duration::from_millis),
        }
    }
}
