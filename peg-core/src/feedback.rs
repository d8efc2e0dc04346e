use serde::{Deserialize, Serialize};

/// Which outcome a feedback message is shown for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackRule {
    /// `[all]`
    Always,
    /// `[correct]`
    WhenCorrect,
    /// `[incorrect]`
    WhenIncorrect,
    /// No marker: shown as-is after every trial.
    Unmarked,
}

impl FeedbackRule {
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            Self::Always => Some("[all]"),
            Self::WhenCorrect => Some("[correct]"),
            Self::WhenIncorrect => Some("[incorrect]"),
            Self::Unmarked => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub rule: FeedbackRule,
    /// Message with the marker removed.
    pub message: String,
}

impl Feedback {
    /// `None` for an empty cell. `[all]` takes precedence over `[correct]`, which
    /// takes precedence over `[incorrect]`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        for rule in [
            FeedbackRule::Always,
            FeedbackRule::WhenCorrect,
            FeedbackRule::WhenIncorrect,
        ] {
            if let Some(marker) = rule.marker() {
                if text.contains(marker) {
                    return Some(Self {
                        rule,
                        message: text.replacen(marker, "", 1).trim().to_string(),
                    });
                }
            }
        }

        Some(Self {
            rule: FeedbackRule::Unmarked,
            message: text.to_string(),
        })
    }

    /// The message to display for this outcome, if any.
    pub fn resolve(&self, is_correct: Option<bool>) -> Option<&str> {
        let show = match self.rule {
            FeedbackRule::Always | FeedbackRule::Unmarked => true,
            FeedbackRule::WhenCorrect => is_correct == Some(true),
            FeedbackRule::WhenIncorrect => is_correct == Some(false),
        };
        (show && !self.message.is_empty()).then_some(self.message.as_str())
    }
}
