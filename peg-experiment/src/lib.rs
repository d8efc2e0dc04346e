//! Turns a validated [`peg_core::TrialTable`] into a trial sequence and runs it.

pub mod compiler;
pub mod config;
pub mod driver;
pub mod state;

pub use compiler::{CompileError, CompileOptions, compile, expected_len};
pub use config::RunConfig;
pub use driver::{
    ChannelSource, EventSource, Input, ScriptedSource, run_observed, run_to_completion,
};
pub use state::{RuntimeEvent, RuntimeSettings, TrialRuntime, TrialToken};
