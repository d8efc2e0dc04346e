pub mod feedback;
pub mod phase;
pub mod response;
pub mod spec;
pub mod stimulus;
pub mod trial;

pub use feedback::{Feedback, FeedbackRule};
pub use phase::RunPhase;
pub use response::{KEY_GRACE_MS, KeyToken, ResponseSpec, TextEntryOptions, normalize_key};
pub use spec::{Block, BlockKind, SECTION_SPAN, TableBuilder, TrialSpec, TrialTable};
pub use stimulus::{
    DirectiveError, Horizontal, ImageRef, ParsedStimulus, Position, Segment, Vertical,
    parse_stimulus,
};
pub use trial::{Grouping, TrialInstance, TrialResult};

/// A parsed value together with the option tokens the parser did not recognise.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub ignored: Vec<String>,
}

impl<T> Parsed<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            ignored: Vec::new(),
        }
    }
}
