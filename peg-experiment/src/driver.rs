use peg_core::TrialResult;
use peg_timing::{ManualTimer, Timer, nanos};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::warn;

use crate::state::{RuntimeEvent, TrialRuntime};

/// Participant input as delivered by a presenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Key(String),
    Text(String),
    /// The source will never deliver input again.
    Closed,
}

/// Waits for the next of {participant input, deadline}.
pub trait EventSource {
    /// Blocks for at most `timeout` (forever when `None`). `None` means the
    /// timeout elapsed first.
    fn wait_input(&mut self, timeout: Option<Duration>) -> Option<Input>;
}

/// Drives `runtime` until it finishes and returns its results.
///
/// Returns `None` when the source closes while the live trial can only end
/// through input.
pub fn run_to_completion<T, S>(runtime: &mut TrialRuntime<T>, source: &mut S) -> Option<Vec<TrialResult>>
where
    T: Timer,
    S: EventSource + ?Sized,
{
    run_observed(runtime, source, |_| {})
}

/// Like [`run_to_completion`], calling `on_change` after every event the
/// runtime accepted so a presenter can redraw.
pub fn run_observed<T, S, F>(
    runtime: &mut TrialRuntime<T>,
    source: &mut S,
    mut on_change: F,
) -> Option<Vec<TrialResult>>
where
    T: Timer,
    S: EventSource + ?Sized,
    F: FnMut(&TrialRuntime<T>),
{
    if runtime.handle_event(RuntimeEvent::Start) {
        on_change(runtime);
    }
    let mut closed = false;

    loop {
        for event in runtime.update() {
            if runtime.handle_event(event) {
                on_change(runtime);
            }
        }
        if runtime.phase().is_finished() {
            return runtime.take_results();
        }

        let timeout = runtime.next_deadline().map(|at| {
            Duration::from_nanos(at.saturating_sub(runtime.timer().now()))
        });
        if closed {
            match timeout {
                Some(wait) => {
                    runtime.timer().sleep(wait);
                    continue;
                }
                None => {
                    warn!(
                        completed = runtime.results().len(),
                        "input closed before the run finished"
                    );
                    return None;
                }
            }
        }

        let accepted = match source.wait_input(timeout) {
            Some(Input::Key(key)) => runtime.handle_event(RuntimeEvent::Key(key)),
            Some(Input::Text(text)) => runtime.handle_event(RuntimeEvent::TextSubmitted(text)),
            Some(Input::Closed) => {
                closed = true;
                false
            }
            None => false,
        };
        if accepted {
            on_change(runtime);
        }
    }
}

/// Receives input from another thread, e.g. a terminal reader.
pub struct ChannelSource {
    rx: Receiver<Input>,
}

impl ChannelSource {
    pub fn channel() -> (Sender<Input>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl EventSource for ChannelSource {
    fn wait_input(&mut self, timeout: Option<Duration>) -> Option<Input> {
        match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(input) => Some(input),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Input::Closed),
            },
            None => Some(self.rx.recv().unwrap_or(Input::Closed)),
        }
    }
}

/// Replays input at fixed offsets on a [`ManualTimer`], jumping the clock
/// forward instead of sleeping.
pub struct ScriptedSource {
    timer: ManualTimer,
    script: VecDeque<(Duration, Input)>,
}

impl ScriptedSource {
    /// `script` holds `(offset from the timer's zero, input)` in time order.
    pub fn new(timer: ManualTimer, script: impl IntoIterator<Item = (Duration, Input)>) -> Self {
        Self {
            timer,
            script: script.into_iter().collect(),
        }
    }
}

impl EventSource for ScriptedSource {
    fn wait_input(&mut self, timeout: Option<Duration>) -> Option<Input> {
        let now = self.timer.now();
        let limit = timeout.map(|t| now.saturating_add(nanos(t)));
        match self.script.front() {
            Some((at, _)) if limit.is_none_or(|limit| nanos(*at) <= limit) => {
                self.timer.set(nanos(*at));
                self.script.pop_front().map(|(_, input)| input)
            }
            _ => match limit {
                Some(limit) => {
                    self.timer.set(limit);
                    None
                }
                None => Some(Input::Closed),
            },
        }
    }
}
