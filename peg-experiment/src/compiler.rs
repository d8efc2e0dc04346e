use peg_core::{Block, BlockKind, Grouping, TrialInstance, TrialTable};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub repetitions: u32,
    pub randomize_sections: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            repetitions: 1,
            randomize_sections: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("block {block} has no trials")]
    EmptyBlock { block: i64 },

    #[error("block {block} repeat count must be at least 1")]
    NonPositiveRepeat { block: i64 },

    #[error("sequence repetitions must be at least 1")]
    NonPositiveRepetitions,

    #[error("table has no blocks")]
    EmptyTable,
}

/// A section's member blocks in authored order and its repeat count.
struct Section<'a> {
    leader: i64,
    repeat_count: u32,
    blocks: Vec<&'a Block>,
}

/// Expands `table` into the ordered sequence of trial instances.
///
/// Fixed blocks (number below 100) are emitted in authored order, repeated
/// back to back by their own repeat count. Sectioned blocks are emitted as a
/// whole section when the walk reaches the section's lowest-numbered block;
/// each section repetition is shuffled independently when
/// `randomize_sections` is set. The whole walk runs `repetitions` times.
pub fn compile<R: Rng + ?Sized>(
    table: &TrialTable,
    options: CompileOptions,
    rng: &mut R,
) -> Result<Vec<TrialInstance>, CompileError> {
    check(table, options)?;
    let sections = sections(table);

    let mut sequence = Vec::with_capacity(expected_len(table, options.repetitions));
    for repetition in 1..=options.repetitions {
        for block in table.blocks() {
            match block.kind() {
                BlockKind::Fixed => {
                    for block_repetition in 1..=block.repeat_count {
                        let grouping = Grouping::Fixed { block_repetition };
                        for spec in &block.trials {
                            sequence.push(instance(spec, repetition, grouping));
                        }
                    }
                }
                BlockKind::Sectioned { section } => {
                    let Some(members) = sections.get(&section) else {
                        continue;
                    };
                    if members.leader != block.number {
                        continue;
                    }
                    for section_repetition in 1..=members.repeat_count {
                        let grouping = Grouping::Sectioned {
                            section,
                            section_repetition,
                        };
                        let mut run: Vec<TrialInstance> = members
                            .blocks
                            .iter()
                            .flat_map(|b| b.trials.iter())
                            .map(|spec| instance(spec, repetition, grouping))
                            .collect();
                        if options.randomize_sections {
                            run.shuffle(rng);
                        }
                        debug!(section, section_repetition, trials = run.len(), "emitted section");
                        sequence.extend(run);
                    }
                }
            }
        }
    }

    for (position, trial) in sequence.iter_mut().enumerate() {
        trial.sequence_position = position;
    }
    info!(
        trials = sequence.len(),
        repetitions = options.repetitions,
        randomized = options.randomize_sections,
        "compiled trial sequence"
    );
    Ok(sequence)
}

/// Length of the compiled sequence for `table` repeated `repetitions` times.
pub fn expected_len(table: &TrialTable, repetitions: u32) -> usize {
    let sections = sections(table);
    let per_pass: usize = table
        .blocks()
        .iter()
        .map(|block| match block.kind() {
            BlockKind::Fixed => block.trials.len() * block.repeat_count as usize,
            BlockKind::Sectioned { section } => {
                let repeats = sections.get(&section).map_or(1, |s| s.repeat_count);
                block.trials.len() * repeats as usize
            }
        })
        .sum();
    per_pass * repetitions as usize
}

fn check(table: &TrialTable, options: CompileOptions) -> Result<(), CompileError> {
    if options.repetitions == 0 {
        return Err(CompileError::NonPositiveRepetitions);
    }
    if table.is_empty() {
        return Err(CompileError::EmptyTable);
    }
    for block in table.blocks() {
        if block.trials.is_empty() {
            return Err(CompileError::EmptyBlock {
                block: block.number,
            });
        }
        if block.repeat_count == 0 {
            return Err(CompileError::NonPositiveRepeat {
                block: block.number,
            });
        }
    }
    Ok(())
}

fn sections(table: &TrialTable) -> HashMap<i64, Section<'_>> {
    let mut sections: HashMap<i64, Section<'_>> = HashMap::new();
    for block in table.blocks() {
        let BlockKind::Sectioned { section } = block.kind() else {
            continue;
        };
        let entry = sections.entry(section).or_insert_with(|| Section {
            leader: block.number,
            repeat_count: block.repeat_count,
            blocks: Vec::new(),
        });
        // The lowest block number leads and supplies the repeat count.
        if block.number < entry.leader {
            entry.leader = block.number;
            entry.repeat_count = block.repeat_count;
        }
        entry.blocks.push(block);
    }
    sections
}

fn instance(spec: &Arc<peg_core::TrialSpec>, repetition: u32, grouping: Grouping) -> TrialInstance {
    TrialInstance {
        spec: Arc::clone(spec),
        repetition,
        grouping,
        sequence_position: 0,
    }
}
