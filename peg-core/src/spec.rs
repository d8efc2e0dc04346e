use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::feedback::Feedback;
use crate::response::ResponseSpec;

/// Block numbers at or above this value belong to a section; section id is `number / SECTION_SPAN`.
pub const SECTION_SPAN: i64 = 100;

/// One validated row of the authored table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSpec {
    /// 1-based row number in the authored table.
    pub row: usize,
    pub block: i64,
    pub stimulus: String,
    pub response: ResponseSpec,
    /// `None` when the latency cell is `NA`.
    pub latency_ms: Option<u64>,
    pub correct_response: Option<String>,
    pub feedback: Option<Feedback>,
    pub feedback_duration_ms: Option<u64>,
    pub stimulus_color: String,
    pub background_color: String,
}

impl TrialSpec {
    pub const DEFAULT_STIMULUS_COLOR: &'static str = "white";
    pub const DEFAULT_BACKGROUND_COLOR: &'static str = "darkgrey";

    /// A keyless, timed trial with default colors.
    pub fn timed(row: usize, block: i64, stimulus: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            row,
            block,
            stimulus: stimulus.into(),
            response: ResponseSpec::None,
            latency_ms: Some(latency_ms),
            correct_response: None,
            feedback: None,
            feedback_duration_ms: None,
            stimulus_color: Self::DEFAULT_STIMULUS_COLOR.to_string(),
            background_color: Self::DEFAULT_BACKGROUND_COLOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Never reordered; repeated by its own repeat count.
    Fixed,
    /// Shuffled and repeated together with the other blocks of its section.
    Sectioned { section: i64 },
}

impl BlockKind {
    pub fn of(number: i64) -> Self {
        if number < SECTION_SPAN {
            Self::Fixed
        } else {
            Self::Sectioned {
                section: number / SECTION_SPAN,
            }
        }
    }
}

/// Trials sharing a block number, in authored row order.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub number: i64,
    /// Taken from the first authored row of the block.
    pub repeat_count: u32,
    pub trials: Vec<Arc<TrialSpec>>,
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        BlockKind::of(self.number)
    }
}

/// Immutable snapshot of the authored table, blocks in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialTable {
    blocks: Vec<Block>,
}

impl TrialTable {
    pub fn builder() -> TableBuilder {
        TableBuilder::default()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, number: i64) -> Option<&Block> {
        self.blocks.iter().find(|b| b.number == number)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn trial_count(&self) -> usize {
        self.blocks.iter().map(|b| b.trials.len()).sum()
    }

    pub fn specs(&self) -> impl Iterator<Item = &TrialSpec> {
        self.blocks.iter().flat_map(|b| b.trials.iter().map(|t| t.as_ref()))
    }
}

/// Groups specs into blocks in first-seen order.
#[derive(Debug, Default)]
pub struct TableBuilder {
    blocks: Vec<Block>,
    index: HashMap<i64, usize>,
}

impl TableBuilder {
    /// `repeat_count` only counts for the first spec of a block; later values are ignored.
    pub fn push(&mut self, spec: TrialSpec, repeat_count: u32) -> &mut Self {
        let number = spec.block;
        let slot = *self.index.entry(number).or_insert_with(|| {
            self.blocks.push(Block {
                number,
                repeat_count,
                trials: Vec::new(),
            });
            self.blocks.len() - 1
        });
        self.blocks[slot].trials.push(Arc::new(spec));
        self
    }

    /// Adds an explicit, possibly empty, block. Used to model hand-built tables.
    pub fn push_block(&mut self, block: Block) -> &mut Self {
        self.index.insert(block.number, self.blocks.len());
        self.blocks.push(block);
        self
    }

    pub fn build(&mut self) -> TrialTable {
        self.index.clear();
        TrialTable {
            blocks: std::mem::take(&mut self.blocks),
        }
    }
}
