//! Terminal presenter. Each stdin line is one response: a key name on key
//! trials (an empty line is the space bar), the typed answer on text trials.

use anyhow::{Result, bail};
use peg_core::{ResponseSpec, RunPhase, Segment, TrialSpec, parse_stimulus};
use peg_experiment::{ChannelSource, Input, TrialRuntime, run_observed};
use peg_render::markup::plain_lines;
use peg_timing::{HighPrecisionTimer, Timer};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::warn;

use crate::session::{Session, completion_message, environment_info};

pub fn run(session: Session) -> Result<()> {
    let (tx, mut source) = ChannelSource::channel();
    let expects_text = Arc::new(AtomicBool::new(false));

    let reader_flag = Arc::clone(&expects_text);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line_to_input(&line, reader_flag.load(Ordering::Acquire))).is_err() {
                return;
            }
        }
        let _ = tx.send(Input::Closed);
    });

    let timer = HighPrecisionTimer::new();
    let mut runtime = TrialRuntime::new(
        session.sequence.clone(),
        timer.clone(),
        session.config.runtime_settings(),
    );

    let results = run_observed(&mut runtime, &mut source, |rt| {
        let text_trial = rt.current().is_some_and(|t| t.spec.response.is_text());
        expects_text.store(text_trial, Ordering::Release);
        print_screen(rt);
    });
    let Some(results) = results else {
        warn!(completed = runtime.results().len(), "run aborted");
        bail!("input ended before the experiment finished; no results were saved");
    };

    let delivery = session.save(
        results,
        runtime.started_at(),
        timer.wall_clock(),
        environment_info("console"),
    )?;
    println!("\n{}", completion_message(&delivery));
    Ok(())
}

fn line_to_input(line: &str, expects_text: bool) -> Input {
    if expects_text {
        return Input::Text(line.trim_end_matches(['\r', '\n']).to_string());
    }
    match line.trim() {
        "" => Input::Key(" ".to_string()),
        key => Input::Key(key.to_string()),
    }
}

fn print_screen<T: Timer>(runtime: &TrialRuntime<T>) {
    match runtime.phase() {
        RunPhase::Presenting => {
            if let Some(trial) = runtime.current() {
                println!();
                println!("[{}/{}]", trial.sequence_position + 1, runtime.len());
                for line in describe(&trial.spec) {
                    println!("  {line}");
                }
            }
        }
        RunPhase::Resolved => {
            if let Some((_, message)) = runtime.feedback() {
                println!("  >> {message}");
            }
        }
        RunPhase::Idle | RunPhase::Finished => {}
    }
}

/// Stimulus text, image placeholders and a response hint, line by line.
fn describe(spec: &TrialSpec) -> Vec<String> {
    let mut lines = Vec::new();
    match parse_stimulus(&spec.stimulus) {
        Ok(stimulus) => {
            for segment in &stimulus.segments {
                match segment {
                    Segment::Markup(markup) => lines.extend(plain_lines(markup)),
                    Segment::Image(image) => lines.push(format!("[image {}]", image.file)),
                }
            }
        }
        Err(err) => lines.push(format!("[unreadable stimulus: {err}]")),
    }

    match &spec.response {
        ResponseSpec::None => {}
        ResponseSpec::Keys { .. } => {
            let keys = spec.response.key_options().join(", ");
            lines.push(format!("(keys: {keys})"));
        }
        ResponseSpec::Text { options } => match &options.placeholder {
            Some(placeholder) => lines.push(format!("(type an answer, e.g. {placeholder}, then Enter)")),
            None => lines.push("(type an answer, then Enter)".to_string()),
        },
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_become_keys_or_text() {
        assert_eq!(line_to_input("f\n", false), Input::Key("f".into()));
        assert_eq!(line_to_input("  \n", false), Input::Key(" ".into()));
        assert_eq!(line_to_input("Space", false), Input::Key("Space".into()));
        assert_eq!(line_to_input(" two words \r\n", true), Input::Text(" two words ".into()));
    }

    #[test]
    fn description_lists_images_and_keys() {
        let mut spec = TrialSpec::timed(1, 1, "<b>Which?</b>[image:a.png]", 100);
        spec.response = ResponseSpec::parse("f,j").value;
        assert_eq!(
            describe(&spec),
            vec!["Which?", "[image a.png]", "(keys: f, j)"]
        );
    }
}
