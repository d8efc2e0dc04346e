use serde::Serialize;

/// Lifecycle of a run. A run never moves backwards; `Finished` is terminal.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum RunPhase {
    #[default]
    Idle,
    Presenting,
    Resolved,
    Finished,
}

impl RunPhase {
    /// Only a presented trial listens for participant input.
    pub fn allows_input(&self) -> bool {
        matches!(self, Self::Presenting)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Presenting | Self::Resolved)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Presenting => "presenting",
            Self::Resolved => "resolved",
            Self::Finished => "finished",
        }
    }
}
