use peg_core::{KEY_GRACE_MS, ResponseSpec, RunPhase, TrialInstance, TrialResult, normalize_key};
use peg_timing::{Timer, iso_timestamp, millis, nanos};
use std::time::Duration;
use tracing::{debug, info};

/// Identifies one presentation of one trial. Timer events carry the token of
/// the trial that armed them so late ones can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrialToken {
    pub position: usize,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// Leaves `Idle` and presents the first trial.
    Start,
    /// A key press, by key name (`f`, `Space`, `" "`, `Shift`).
    Key(String),
    /// Submitted contents of a text-entry field.
    TextSubmitted(String),
    Timeout(TrialToken),
    FeedbackElapsed(TrialToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub default_feedback: Duration,
    /// Closes the key window this long after onset on trials that also time
    /// out. `None` keeps keys open until the timeout.
    pub key_grace: Option<Duration>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            default_feedback: Duration::from_millis(1000),
            key_grace: Some(Duration::from_millis(KEY_GRACE_MS)),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveTrial {
    token: TrialToken,
    started_ns: u64,
    timeout_ns: Option<u64>,
    keys_close_ns: Option<u64>,
}

#[derive(Debug, Clone)]
struct ShownFeedback {
    token: TrialToken,
    message: String,
    until_ns: u64,
}

enum Captured {
    Key(String),
    Text(String),
    Timeout,
}

/// Presents compiled trials one at a time.
///
/// `update` polls the clock and returns due timer events; `handle_event`
/// applies one event and reports whether it changed anything. At most one
/// trial is live; every event naming another trial is ignored.
pub struct TrialRuntime<T: Timer> {
    trials: Vec<TrialInstance>,
    timer: T,
    settings: RuntimeSettings,
    phase: RunPhase,
    cursor: usize,
    generation: u64,
    active: Option<ActiveTrial>,
    feedback: Option<ShownFeedback>,
    results: Vec<TrialResult>,
    started_at: Option<String>,
    delivered: bool,
}

impl<T: Timer> TrialRuntime<T> {
    pub fn new(trials: Vec<TrialInstance>, timer: T, settings: RuntimeSettings) -> Self {
        Self {
            trials,
            timer,
            settings,
            phase: RunPhase::Idle,
            cursor: 0,
            generation: 0,
            active: None,
            feedback: None,
            results: Vec::new(),
            started_at: None,
            delivered: false,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// The trial on screen, while one is presented.
    pub fn current(&self) -> Option<&TrialInstance> {
        self.active.as_ref().map(|a| &self.trials[a.token.position])
    }

    pub fn current_token(&self) -> Option<TrialToken> {
        self.active.as_ref().map(|a| a.token)
    }

    /// The trial whose feedback is on screen, with the message.
    pub fn feedback(&self) -> Option<(&TrialInstance, &str)> {
        self.feedback
            .as_ref()
            .map(|f| (&self.trials[f.token.position], f.message.as_str()))
    }

    /// ISO-8601 wall-clock time of `Start`.
    pub fn started_at(&self) -> Option<&str> {
        self.started_at.as_deref()
    }

    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }

    /// Hands over the results once the run has finished. Later calls return `None`.
    pub fn take_results(&mut self) -> Option<Vec<TrialResult>> {
        if !self.phase.is_finished() || self.delivered {
            return None;
        }
        self.delivered = true;
        Some(std::mem::take(&mut self.results))
    }

    /// Nanosecond clock reading at which the next timer event is due.
    pub fn next_deadline(&self) -> Option<u64> {
        match self.phase {
            RunPhase::Presenting => self.active.as_ref().and_then(|a| a.timeout_ns),
            RunPhase::Resolved => self.feedback.as_ref().map(|f| f.until_ns),
            RunPhase::Idle | RunPhase::Finished => None,
        }
    }

    pub fn update(&mut self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        let now = self.timer.now();
        match self.phase {
            RunPhase::Presenting => {
                if let Some(active) = &self.active {
                    if active.timeout_ns.is_some_and(|at| now >= at) {
                        events.push(RuntimeEvent::Timeout(active.token));
                    }
                }
            }
            RunPhase::Resolved => {
                if let Some(shown) = &self.feedback {
                    if now >= shown.until_ns {
                        events.push(RuntimeEvent::FeedbackElapsed(shown.token));
                    }
                }
            }
            RunPhase::Idle | RunPhase::Finished => {}
        }
        events
    }

    pub fn handle_event(&mut self, event: RuntimeEvent) -> bool {
        match (self.phase, event) {
            (RunPhase::Idle, RuntimeEvent::Start) => {
                info!(trials = self.trials.len(), "run started");
                self.started_at = Some(iso_timestamp(self.timer.wall_clock()));
                self.present(0);
                true
            }
            (RunPhase::Presenting, RuntimeEvent::Key(key)) => {
                let Some(active) = &self.active else {
                    return false;
                };
                let now = self.timer.now();
                if active.keys_close_ns.is_some_and(|at| now >= at) {
                    debug!(key = %key, "key window closed");
                    return false;
                }
                let trial = &self.trials[active.token.position];
                if !trial.spec.response.accepts_key(&key) {
                    return false;
                }
                self.resolve(Captured::Key(normalize_key(&key)));
                true
            }
            (RunPhase::Presenting, RuntimeEvent::TextSubmitted(text)) => {
                let accepts = self
                    .current()
                    .is_some_and(|t| t.spec.response.is_text());
                if accepts {
                    self.resolve(Captured::Text(text));
                }
                accepts
            }
            (RunPhase::Presenting, RuntimeEvent::Timeout(token)) => {
                if self.current_token() != Some(token) {
                    debug!(?token, "ignoring stale timeout");
                    return false;
                }
                self.resolve(Captured::Timeout);
                true
            }
            (RunPhase::Resolved, RuntimeEvent::FeedbackElapsed(token)) => {
                if self.feedback.as_ref().map(|f| f.token) != Some(token) {
                    debug!(?token, "ignoring stale feedback timer");
                    return false;
                }
                self.feedback = None;
                self.advance();
                true
            }
            (phase, event) => {
                debug!(phase = phase.label(), ?event, "event not handled");
                false
            }
        }
    }

    fn present(&mut self, position: usize) {
        self.active = None;
        self.feedback = None;

        let Some(trial) = self.trials.get(position) else {
            self.finish();
            return;
        };

        self.generation += 1;
        let token = TrialToken {
            position,
            generation: self.generation,
        };
        let started_ns = self.timer.now();
        let timeout_ns = trial
            .spec
            .latency_ms
            .map(|ms| started_ns.saturating_add(nanos(Duration::from_millis(ms))));
        let keys_close_ns = match (&trial.spec.response, timeout_ns, self.settings.key_grace) {
            (ResponseSpec::Keys { .. }, Some(_), Some(grace)) => {
                Some(started_ns.saturating_add(nanos(grace)))
            }
            _ => None,
        };

        debug!(
            position,
            block = trial.spec.block,
            row = trial.spec.row,
            "presenting trial"
        );
        self.cursor = position;
        self.phase = RunPhase::Presenting;
        self.active = Some(ActiveTrial {
            token,
            started_ns,
            timeout_ns,
            keys_close_ns,
        });
    }

    fn resolve(&mut self, captured: Captured) {
        let Some(active) = self.active.take() else {
            return;
        };
        let now = self.timer.now();
        let trial = &self.trials[active.token.position];
        let spec = &trial.spec;

        let (actual_response, timed_out) = match captured {
            Captured::Key(key) => (Some(key), false),
            Captured::Text(text) => (Some(text), false),
            Captured::Timeout => (None, true),
        };
        let is_correct = spec.correct_response.as_deref().map(|correct| {
            match (&spec.response, actual_response.as_deref()) {
                (_, None) => false,
                (ResponseSpec::Text { .. }, Some(given)) => given == correct,
                (_, Some(given)) => normalize_key(given) == normalize_key(correct),
            }
        });
        let shown = spec
            .feedback
            .as_ref()
            .and_then(|f| f.resolve(is_correct))
            .map(str::to_string);

        let mut result = TrialResult::for_instance(trial, iso_timestamp(self.timer.wall_clock()));
        result.actual_response = actual_response;
        result.response_time_ms = millis(Duration::from_nanos(now.saturating_sub(active.started_ns)));
        result.is_correct = is_correct;
        result.timed_out = timed_out;
        result.feedback_shown = shown.clone();
        debug!(
            position = result.sequence_position,
            rt_ms = result.response_time_ms,
            ?is_correct,
            timed_out,
            "trial resolved"
        );
        self.results.push(result);

        match shown {
            Some(message) => {
                let hold = spec
                    .feedback_duration_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.settings.default_feedback);
                self.phase = RunPhase::Resolved;
                self.feedback = Some(ShownFeedback {
                    token: active.token,
                    message,
                    until_ns: now.saturating_add(nanos(hold)),
                });
            }
            None => self.advance(),
        }
    }

    fn advance(&mut self) {
        self.present(self.cursor + 1);
    }

    fn finish(&mut self) {
        self.phase = RunPhase::Finished;
        self.active = None;
        self.feedback = None;
        info!(results = self.results.len(), "run finished");
    }
}
