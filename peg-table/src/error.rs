use std::path::PathBuf;
use thiserror::Error;

use crate::row::Field;

/// A problem with one authored row, or with the run's repeat count.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("row {row}: Block cannot be empty")]
    EmptyBlock { row: usize },

    #[error("row {row}: Block must be an integer, got {value:?}")]
    InvalidBlock { row: usize, value: String },

    #[error("row {row}: Block Repeats must be a positive integer, got {value:?}")]
    InvalidBlockRepeats { row: usize, value: String },

    #[error("row {row}: Latency must be a number of milliseconds or NA, got {value:?}")]
    InvalidLatency { row: usize, value: String },

    #[error("row {row}: Response and Latency cannot both be NA")]
    NoWayToEnd { row: usize },

    #[error("row {row}: Correct Response {correct:?} must be one of the Response options {options:?}")]
    CorrectResponseNotOffered {
        row: usize,
        correct: String,
        options: Vec<String>,
    },

    #[error("row {row}: Feedback Duration must be a number of milliseconds, got {value:?}")]
    InvalidFeedbackDuration { row: usize, value: String },

    #[error("row {row}: Stimulus {source}")]
    InvalidImageOption {
        row: usize,
        source: peg_core::DirectiveError,
    },

    #[error("row {row}: Stimulus image {file:?} not found in {}", dir.display())]
    MissingImage {
        row: usize,
        file: String,
        dir: PathBuf,
    },

    #[error("Repeat Sequence must be a positive integer, got {value:?}")]
    InvalidRepetitions { value: String },

    #[error("no trials defined")]
    NoTrials,
}

impl ValidationError {
    /// 1-based authored row, when the error belongs to one.
    pub fn row(&self) -> Option<usize> {
        match self {
            Self::EmptyBlock { row }
            | Self::InvalidBlock { row, .. }
            | Self::InvalidBlockRepeats { row, .. }
            | Self::InvalidLatency { row, .. }
            | Self::NoWayToEnd { row }
            | Self::CorrectResponseNotOffered { row, .. }
            | Self::InvalidFeedbackDuration { row, .. }
            | Self::InvalidImageOption { row, .. }
            | Self::MissingImage { row, .. } => Some(*row),
            Self::InvalidRepetitions { .. } | Self::NoTrials => None,
        }
    }

    pub fn field(&self) -> Option<Field> {
        match self {
            Self::EmptyBlock { .. } | Self::InvalidBlock { .. } => Some(Field::Block),
            Self::InvalidBlockRepeats { .. } => Some(Field::BlockRepeats),
            Self::InvalidLatency { .. } | Self::NoWayToEnd { .. } => Some(Field::Latency),
            Self::CorrectResponseNotOffered { .. } => Some(Field::CorrectResponse),
            Self::InvalidFeedbackDuration { .. } => Some(Field::FeedbackDuration),
            Self::InvalidImageOption { .. } | Self::MissingImage { .. } => Some(Field::Stimulus),
            Self::InvalidRepetitions { .. } => Some(Field::Repetitions),
            Self::NoTrials => None,
        }
    }
}

/// Every validation error found in a table, in row order. Never empty.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(err: ValidationError) -> Self {
        Self(vec![err])
    }
}

/// Reading or writing a table file.
#[derive(Error, Debug)]
pub enum TableIoError {
    #[error("table I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("table file has no header row")]
    MissingHeader,

    #[error("CSV headers do not match a known format: {found:?}")]
    HeaderMismatch { found: Vec<String> },
}
