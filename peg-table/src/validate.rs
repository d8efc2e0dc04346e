use peg_core::response::is_na;
use peg_core::{Feedback, ResponseSpec, TrialSpec, TrialTable, parse_stimulus};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{ValidationError, ValidationErrors};
use crate::row::AuthoredRow;

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Directory stimulus images are resolved against.
    pub image_dir: PathBuf,
    pub check_images: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("images"),
            check_images: true,
        }
    }
}

/// Parses the run-level repeat count typed next to the table.
pub fn validate_repetitions(raw: &str) -> Result<u32, ValidationError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ValidationError::InvalidRepetitions {
            value: raw.to_string(),
        }),
    }
}

/// Validates every non-blank row and snapshots the result as a [`TrialTable`].
///
/// All problems are collected; the table is only produced when there are none.
/// Row numbers count blank rows too, so they match what the author sees.
pub fn validate_rows(
    rows: &[AuthoredRow],
    options: &ValidationOptions,
) -> Result<TrialTable, ValidationErrors> {
    let mut errors = Vec::new();
    let mut builder = TrialTable::builder();
    let mut seen_blocks = HashSet::new();
    let mut authored = 0usize;

    for (index, raw) in rows.iter().enumerate() {
        if raw.is_blank() {
            continue;
        }
        authored += 1;
        let row = index + 1;
        let before = errors.len();

        let block = parse_block(row, &raw.block, &mut errors);

        // Only the first row of a block sets its repeat count.
        let mut repeat_count = 1;
        if let Some(number) = block {
            if seen_blocks.insert(number) {
                repeat_count = parse_block_repeats(row, &raw.block_repeats, &mut errors);
            }
        }

        let response = ResponseSpec::parse(&raw.response);
        for token in &response.ignored {
            warn!(row, option = %token, "ignoring unknown text-entry option");
        }
        let response = response.value;

        let latency_ms = if is_na(&raw.latency) {
            if response.is_none() {
                errors.push(ValidationError::NoWayToEnd { row });
            }
            None
        } else {
            match raw.latency.trim().parse::<u64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    errors.push(ValidationError::InvalidLatency {
                        row,
                        value: raw.latency.clone(),
                    });
                    None
                }
            }
        };

        let correct_response = non_empty(&raw.correct_response);
        if let (Some(correct), ResponseSpec::Keys { .. }) = (&correct_response, &response) {
            let offered = response.key_options();
            if !offered.contains(&correct.as_str()) {
                errors.push(ValidationError::CorrectResponseNotOffered {
                    row,
                    correct: correct.clone(),
                    options: offered.iter().map(|s| s.to_string()).collect(),
                });
            }
        }

        let feedback_duration_ms = match non_empty(&raw.feedback_duration) {
            None => None,
            Some(value) => match value.parse::<u64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    errors.push(ValidationError::InvalidFeedbackDuration { row, value });
                    None
                }
            },
        };

        check_stimulus(row, &raw.stimulus, options, &mut errors);

        if errors.len() > before {
            continue;
        }
        let Some(block) = block else { continue };

        builder.push(
            TrialSpec {
                row,
                block,
                stimulus: raw.stimulus.trim().to_string(),
                response,
                latency_ms,
                correct_response,
                feedback: Feedback::parse(&raw.feedback_text),
                feedback_duration_ms,
                stimulus_color: non_empty(&raw.stimulus_color)
                    .unwrap_or_else(|| TrialSpec::DEFAULT_STIMULUS_COLOR.to_string()),
                background_color: non_empty(&raw.background_color)
                    .unwrap_or_else(|| TrialSpec::DEFAULT_BACKGROUND_COLOR.to_string()),
            },
            repeat_count,
        );
    }

    if authored == 0 {
        errors.push(ValidationError::NoTrials);
    }
    if !errors.is_empty() {
        return Err(ValidationErrors(errors));
    }

    let table = builder.build();
    info!(
        blocks = table.blocks().len(),
        trials = table.trial_count(),
        "validated trial table"
    );
    Ok(table)
}

fn non_empty(cell: &str) -> Option<String> {
    let cell = cell.trim();
    (!cell.is_empty()).then(|| cell.to_string())
}

fn parse_block(row: usize, cell: &str, errors: &mut Vec<ValidationError>) -> Option<i64> {
    let cell = cell.trim();
    if cell.is_empty() {
        errors.push(ValidationError::EmptyBlock { row });
        return None;
    }
    match cell.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            errors.push(ValidationError::InvalidBlock {
                row,
                value: cell.to_string(),
            });
            None
        }
    }
}

fn parse_block_repeats(row: usize, cell: &str, errors: &mut Vec<ValidationError>) -> u32 {
    let Some(value) = non_empty(cell) else {
        return 1;
    };
    match value.parse::<u32>() {
        Ok(n) if n >= 1 => n,
        _ => {
            errors.push(ValidationError::InvalidBlockRepeats { row, value });
            1
        }
    }
}

fn check_stimulus(
    row: usize,
    stimulus: &str,
    options: &ValidationOptions,
    errors: &mut Vec<ValidationError>,
) {
    let parsed = match parse_stimulus(stimulus) {
        Ok(parsed) => parsed,
        Err(source) => {
            errors.push(ValidationError::InvalidImageOption { row, source });
            return;
        }
    };
    for token in &parsed.ignored {
        warn!(row, option = %token, "ignoring unknown image directive option");
    }
    if !options.check_images {
        return;
    }

    let mut reported = HashSet::new();
    for image in parsed.images() {
        let path = options.image_dir.join(&image.file);
        if !path.is_file() && reported.insert(image.file.clone()) {
            errors.push(ValidationError::MissingImage {
                row,
                file: image.file.clone(),
                dir: options.image_dir.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Field;

    fn no_images() -> ValidationOptions {
        ValidationOptions {
            image_dir: PathBuf::from("does-not-exist"),
            check_images: false,
        }
    }

    fn row(cells: &[&str]) -> AuthoredRow {
        AuthoredRow::from_cells(cells.iter().copied())
    }

    #[test]
    fn valid_rows_become_blocks_with_defaults() {
        let rows = vec![
            row(&["1", "", "Welcome", "space", "NA"]),
            AuthoredRow::default(),
            row(&["101", "3", "A", "f,j", "2000", "f", "[correct] Nice!", "", "yellow", "black"]),
            row(&["101", "7", "B", "f,j", "2000", "j"]),
        ];
        let table = validate_rows(&rows, &no_images()).unwrap();
        assert_eq!(table.blocks().len(), 2);

        let first = &table.blocks()[0];
        assert_eq!(first.repeat_count, 1);
        assert_eq!(first.trials[0].stimulus_color, "white");
        assert_eq!(first.trials[0].background_color, "darkgrey");
        assert_eq!(first.trials[0].latency_ms, None);

        let section = table.block(101).unwrap();
        assert_eq!(section.repeat_count, 3);
        assert_eq!(section.trials[0].row, 3);
        assert_eq!(section.trials[0].correct_response.as_deref(), Some("f"));
        assert_eq!(section.trials[0].latency_ms, Some(2000));
        assert!(section.trials[0].feedback.is_some());
        assert_eq!(section.trials[1].stimulus_color, "white");
    }

    #[test]
    fn every_error_names_row_and_field() {
        let rows = vec![
            row(&["", "", "x", "a", "NA"]),
            row(&["one", "", "x", "a", "NA"]),
            row(&["1", "", "x", "NA", "NA"]),
            row(&["1", "", "x", "a", "soon"]),
            row(&["2", "0", "x", "a,b", "NA", "c"]),
            row(&["3", "", "x", "a", "NA", "", "", "long"]),
        ];
        let errors = validate_rows(&rows, &no_images()).unwrap_err();
        let found: Vec<(Option<usize>, Option<Field>)> =
            errors.iter().map(|e| (e.row(), e.field())).collect();
        assert_eq!(
            found,
            vec![
                (Some(1), Some(Field::Block)),
                (Some(2), Some(Field::Block)),
                (Some(3), Some(Field::Latency)),
                (Some(4), Some(Field::Latency)),
                (Some(5), Some(Field::BlockRepeats)),
                (Some(5), Some(Field::CorrectResponse)),
                (Some(6), Some(Field::FeedbackDuration)),
            ]
        );
        assert!(errors.to_string().contains("row 3: Response and Latency cannot both be NA"));
    }

    #[test]
    fn text_entry_skips_correct_response_check() {
        let rows = vec![row(&["1", "", "Name?", "[text]", "NA", "Ada"])];
        let table = validate_rows(&rows, &no_images()).unwrap();
        assert!(table.blocks()[0].trials[0].response.is_text());
    }

    #[test]
    fn correct_response_matches_authored_tokens_exactly() {
        let rows = vec![
            row(&["1", "", "x", "f, j", "NA", " j "]),
            row(&["1", "", "x", "f,j", "NA", "F"]),
            row(&["1", "", "x", "space", "NA", " "]),
        ];
        let errors = validate_rows(&rows, &no_images()).unwrap_err();
        let rows_with_errors: Vec<Option<usize>> = errors.iter().map(|e| e.row()).collect();
        assert_eq!(rows_with_errors, vec![Some(2)]);
        assert_eq!(errors.0[0].field(), Some(Field::CorrectResponse));
    }

    #[test]
    fn later_block_repeats_are_not_checked() {
        let rows = vec![
            row(&["4", "2", "a", "NA", "100"]),
            row(&["4", "nonsense", "b", "NA", "100"]),
        ];
        let table = validate_rows(&rows, &no_images()).unwrap();
        assert_eq!(table.block(4).unwrap().repeat_count, 2);
    }

    #[test]
    fn bad_image_size_is_reported() {
        let rows = vec![row(&["1", "", "[image:a.png(width=wide)]", "NA", "100"])];
        let errors = validate_rows(&rows, &no_images()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.0[0].field(), Some(Field::Stimulus));
    }

    #[test]
    fn empty_table_has_no_trials() {
        let errors = validate_rows(&[AuthoredRow::default()], &no_images()).unwrap_err();
        assert_eq!(errors.0, vec![ValidationError::NoTrials]);
    }

    #[test]
    fn repetitions_must_be_positive() {
        assert_eq!(validate_repetitions(" 3 "), Ok(3));
        assert!(validate_repetitions("0").is_err());
        assert!(validate_repetitions("-1").is_err());
        assert_eq!(
            validate_repetitions("x").unwrap_err().field(),
            Some(Field::Repetitions)
        );
    }
}
