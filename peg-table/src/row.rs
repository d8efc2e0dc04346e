use std::fmt;

/// Columns of the authored table, plus the run-level repeat count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Block,
    BlockRepeats,
    Stimulus,
    Response,
    Latency,
    CorrectResponse,
    FeedbackText,
    FeedbackDuration,
    StimulusColor,
    BackgroundColor,
    Repetitions,
}

impl Field {
    /// Table columns in current (V2) order.
    pub const COLUMNS: [Field; 10] = [
        Field::Block,
        Field::BlockRepeats,
        Field::Stimulus,
        Field::Response,
        Field::Latency,
        Field::CorrectResponse,
        Field::FeedbackText,
        Field::FeedbackDuration,
        Field::StimulusColor,
        Field::BackgroundColor,
    ];

    pub fn header(&self) -> &'static str {
        match self {
            Field::Block => "Block",
            Field::BlockRepeats => "Block Repeats",
            Field::Stimulus => "Stimulus",
            Field::Response => "Response",
            Field::Latency => "Latency",
            Field::CorrectResponse => "Correct Response",
            Field::FeedbackText => "Feedback Text",
            Field::FeedbackDuration => "Feedback Duration",
            Field::StimulusColor => "Stimulus Color",
            Field::BackgroundColor => "Background Color",
            Field::Repetitions => "Repeat Sequence",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// One row as typed into the authoring form. Cells are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthoredRow {
    pub block: String,
    pub block_repeats: String,
    pub stimulus: String,
    pub response: String,
    pub latency: String,
    pub correct_response: String,
    pub feedback_text: String,
    pub feedback_duration: String,
    pub stimulus_color: String,
    pub background_color: String,
}

impl AuthoredRow {
    /// Builds a row from cells in V2 column order; missing cells are empty.
    pub fn from_cells<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row = Self::default();
        for (field, cell) in Field::COLUMNS.iter().zip(cells) {
            if let Some(slot) = row.cell_mut(*field) {
                *slot = cell.into();
            }
        }
        row
    }

    pub fn cells(&self) -> [&str; 10] {
        [
            self.block.as_str(),
            self.block_repeats.as_str(),
            self.stimulus.as_str(),
            self.response.as_str(),
            self.latency.as_str(),
            self.correct_response.as_str(),
            self.feedback_text.as_str(),
            self.feedback_duration.as_str(),
            self.stimulus_color.as_str(),
            self.background_color.as_str(),
        ]
    }

    fn cell_mut(&mut self, field: Field) -> Option<&mut String> {
        let cell = match field {
            Field::Block => &mut self.block,
            Field::BlockRepeats => &mut self.block_repeats,
            Field::Stimulus => &mut self.stimulus,
            Field::Response => &mut self.response,
            Field::Latency => &mut self.latency,
            Field::CorrectResponse => &mut self.correct_response,
            Field::FeedbackText => &mut self.feedback_text,
            Field::FeedbackDuration => &mut self.feedback_duration,
            Field::StimulusColor => &mut self.stimulus_color,
            Field::BackgroundColor => &mut self.background_color,
            Field::Repetitions => return None,
        };
        Some(cell)
    }

    /// Blank form rows carry no trial and are skipped.
    pub fn is_blank(&self) -> bool {
        self.cells().iter().all(|c| c.trim().is_empty())
    }
}
