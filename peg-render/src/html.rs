//! The self-contained browser artifact: a static page, a static runtime
//! script and one JSON payload describing the compiled sequence.
//!
//! The payload is built as plain data and serialized once. Nothing from the
//! authored table is spliced into script text.

use peg_core::{
    Feedback, Grouping, ImageRef, KEY_GRACE_MS, ResponseSpec, Segment, TrialInstance, parse_stimulus,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::RenderError;

const TEMPLATE: &str = include_str!("../assets/template.html");
const RUNTIME: &str = include_str!("../assets/runtime.js");

pub const ARTIFACT_FILE: &str = "experiment.html";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSettings {
    #[serde(skip)]
    pub title: String,
    pub randomized: bool,
    pub repetitions: u32,
    /// Results are POSTed here first when set.
    pub save_endpoint: Option<String>,
    pub default_feedback_ms: u64,
    /// Key window on timed key trials, from onset. `null` keeps it open.
    pub key_grace_ms: Option<u64>,
    /// Prefix for image sources, relative to the written page.
    pub image_base: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            title: "Experiment".to_string(),
            randomized: true,
            repetitions: 1,
            save_endpoint: None,
            default_feedback_ms: 1000,
            key_grace_ms: Some(KEY_GRACE_MS),
            image_base: "images".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BrowserResponse {
    None,
    /// Normalised key names, compared against `KeyboardEvent.key` lowercased.
    Keys { keys: Vec<String> },
    #[serde(rename_all = "camelCase")]
    Text {
        placeholder: Option<String>,
        max_length: Option<u32>,
        width_px: Option<u32>,
    },
}

impl From<&ResponseSpec> for BrowserResponse {
    fn from(spec: &ResponseSpec) -> Self {
        match spec {
            ResponseSpec::None => Self::None,
            ResponseSpec::Keys { keys } => Self::Keys {
                keys: keys.iter().map(|k| k.normalized()).collect(),
            },
            ResponseSpec::Text { options } => Self::Text {
                placeholder: options.placeholder.clone(),
                max_length: options.max_length,
                width_px: options.width_px,
            },
        }
    }
}

/// One compiled trial as the browser runtime sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTrial {
    pub sequence_position: usize,
    pub block: i64,
    pub repetition: u32,
    #[serde(flatten)]
    pub grouping: Grouping,
    /// Raw stimulus as authored, echoed into the results.
    pub stimulus: String,
    /// Stimulus with image directives replaced by `<img>` elements.
    pub stimulus_html: String,
    /// `vertical-horizontal`, e.g. `top-left`.
    pub position: String,
    pub response: BrowserResponse,
    pub latency_ms: Option<u64>,
    pub correct_response: Option<String>,
    pub feedback: Option<Feedback>,
    pub feedback_duration_ms: Option<u64>,
    pub stimulus_color: String,
    pub background_color: String,
}

impl BrowserTrial {
    pub fn new(instance: &TrialInstance, image_base: &str) -> Result<Self, RenderError> {
        let spec = &instance.spec;
        let stimulus = parse_stimulus(&spec.stimulus)?;
        let stimulus_html = stimulus
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Markup(markup) => markup.clone(),
                Segment::Image(image) => img_tag(image, image_base),
            })
            .collect();

        Ok(Self {
            sequence_position: instance.sequence_position,
            block: spec.block,
            repetition: instance.repetition,
            grouping: instance.grouping,
            stimulus: spec.stimulus.clone(),
            stimulus_html,
            position: stimulus.position.to_string(),
            response: BrowserResponse::from(&spec.response),
            latency_ms: spec.latency_ms,
            correct_response: spec.correct_response.clone(),
            feedback: spec.feedback.clone(),
            feedback_duration_ms: spec.feedback_duration_ms,
            stimulus_color: spec.stimulus_color.clone(),
            background_color: spec.background_color.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserPayload {
    pub trials: Vec<BrowserTrial>,
    /// Every image source, loaded before the first trial is shown.
    pub preload: Vec<String>,
    pub settings: ArtifactSettings,
}

impl BrowserPayload {
    pub fn new(sequence: &[TrialInstance], settings: ArtifactSettings) -> Result<Self, RenderError> {
        let mut preload = BTreeSet::new();
        let mut trials = Vec::with_capacity(sequence.len());
        for instance in sequence {
            let trial = BrowserTrial::new(instance, &settings.image_base)?;
            for image in parse_stimulus(&instance.spec.stimulus)?.images() {
                preload.insert(image_src(image, &settings.image_base));
            }
            trials.push(trial);
        }
        Ok(Self {
            trials,
            preload: preload.into_iter().collect(),
            settings,
        })
    }
}

/// The complete page. The payload lands in a JSON script block with `<`, `>`
/// and `&` escaped, so no stimulus text can close the element.
pub fn render_document(payload: &BrowserPayload) -> Result<String, RenderError> {
    let json = serde_json::to_string(payload)?
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026");
    Ok(TEMPLATE
        .replace("{{TITLE}}", &escape_html(&payload.settings.title))
        .replace("{{RUNTIME}}", RUNTIME)
        .replace("{{PAYLOAD}}", &json))
}

/// Writes `experiment.html` into `dir`, creating it if needed.
pub fn write_artifact(dir: impl AsRef<Path>, payload: &BrowserPayload) -> Result<PathBuf, RenderError> {
    let dir = dir.as_ref();
    let path = dir.join(ARTIFACT_FILE);
    let document = render_document(payload)?;
    fs::create_dir_all(dir)
        .and_then(|_| fs::write(&path, document))
        .map_err(|source| RenderError::Io {
            path: path.clone(),
            source,
        })?;
    info!(
        path = %path.display(),
        trials = payload.trials.len(),
        images = payload.preload.len(),
        "browser artifact written"
    );
    Ok(path)
}

fn image_src(image: &ImageRef, base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        image.file.clone()
    } else {
        format!("{base}/{}", image.file)
    }
}

fn img_tag(image: &ImageRef, base: &str) -> String {
    let mut style = String::from("max-width:90vw;max-height:90vh;object-fit:contain;");
    if let Some(w) = image.width {
        style.push_str(&format!("width:{w}px;"));
    }
    if let Some(h) = image.height {
        style.push_str(&format!("height:{h}px;"));
    }
    format!(
        "<img src=\"{}\" alt=\"{}\" style=\"{style}\">",
        escape_html(&image_src(image, base)),
        escape_html(&image.file)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use peg_core::{FeedbackRule, TrialSpec, normalize_key};
    use std::sync::Arc;

    fn instance(spec: TrialSpec, position: usize) -> TrialInstance {
        TrialInstance {
            spec: Arc::new(spec),
            repetition: 1,
            grouping: Grouping::Fixed { block_repetition: 1 },
            sequence_position: position,
        }
    }

    fn payload_json(document: &str) -> serde_json::Value {
        let start = document.find("type=\"application/json\">").unwrap() + 24;
        let end = start + document[start..].find("</script>").unwrap();
        serde_json::from_str(&document[start..end]).unwrap()
    }

    #[test]
    fn images_become_img_tags_and_preload_entries() {
        let spec = TrialSpec::timed(1, 1, "Look: [image:cat.png(width=200, bottom-right)]", 500);
        let payload = BrowserPayload::new(&[instance(spec, 0)], ArtifactSettings::default()).unwrap();
        let trial = &payload.trials[0];
        assert!(trial.stimulus_html.starts_with("Look: <img src=\"images/cat.png\""));
        assert!(trial.stimulus_html.contains("width:200px;"));
        assert_eq!(trial.position, "bottom-right");
        assert_eq!(payload.preload, vec!["images/cat.png"]);
    }

    #[test]
    fn response_keys_are_normalised() {
        let mut spec = TrialSpec::timed(1, 1, "X", 500);
        spec.response = ResponseSpec::parse("Space, F").value;
        let trial = BrowserTrial::new(&instance(spec, 0), "").unwrap();
        assert_eq!(
            trial.response,
            BrowserResponse::Keys {
                keys: vec![" ".to_string(), "f".to_string()]
            }
        );
    }

    #[test]
    fn stimulus_text_cannot_break_out_of_the_payload() {
        let spec = TrialSpec::timed(1, 1, "</script><script>alert(1)</script>", 500);
        let payload = BrowserPayload::new(&[instance(spec, 0)], ArtifactSettings::default()).unwrap();
        let document = render_document(&payload).unwrap();

        assert_eq!(document.matches("</script>").count(), TEMPLATE.matches("</script>").count());
        let json = payload_json(&document);
        assert_eq!(json["trials"][0]["stimulus"], "</script><script>alert(1)</script>");
    }

    #[test]
    fn payload_carries_settings_and_feedback() {
        let mut spec = TrialSpec::timed(4, 101, "S", 800);
        spec.feedback = Feedback::parse("[correct] Yes!");
        spec.correct_response = Some("f".into());
        let settings = ArtifactSettings {
            save_endpoint: Some("https://lab.example/save.php".into()),
            repetitions: 3,
            ..ArtifactSettings::default()
        };
        let payload = BrowserPayload::new(&[instance(spec, 7)], settings).unwrap();
        let json = payload_json(&render_document(&payload).unwrap());

        assert_eq!(json["settings"]["saveEndpoint"], "https://lab.example/save.php");
        assert_eq!(json["settings"]["repetitions"], 3);
        assert_eq!(json["settings"]["defaultFeedbackMs"], 1000);
        assert_eq!(json["settings"]["keyGraceMs"], 50);
        let trial = &json["trials"][0];
        assert_eq!(trial["sequencePosition"], 7);
        assert_eq!(trial["grouping"], "fixed");
        assert_eq!(trial["feedback"]["rule"], serde_json::to_value(FeedbackRule::WhenCorrect).unwrap());
        assert_eq!(trial["feedback"]["message"], "Yes!");
        assert_eq!(trial["latencyMs"], 800);
    }

    #[test]
    fn open_key_window_serializes_as_null() {
        let settings = ArtifactSettings {
            key_grace_ms: None,
            ..ArtifactSettings::default()
        };
        let payload = BrowserPayload::new(&[], settings).unwrap();
        let json = payload_json(&render_document(&payload).unwrap());
        assert!(json["settings"]["keyGraceMs"].is_null());
    }

    #[test]
    fn artifact_is_written_to_the_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let payload = BrowserPayload::new(&[], ArtifactSettings::default()).unwrap();
        let path = write_artifact(dir.path().join("out"), &payload).unwrap();
        assert_eq!(path, dir.path().join("out").join(ARTIFACT_FILE));
        let document = fs::read_to_string(path).unwrap();
        assert!(document.contains("<title>Experiment</title>"));
        assert!(document.contains("function presentTrial"));
        assert!(document.contains("const MAX_DELAY_MS = 2147483647;"));
        assert!(document.contains("startedAt: startedAt"));
    }

    #[test]
    fn runtime_key_map_folds_like_normalize_key() {
        for alias in ["space", "spacebar", "ctrl", "control", "lshift", "rshift", "shift"] {
            let entry = format!("'{alias}': '{}'", normalize_key(alias));
            assert!(RUNTIME.contains(&entry), "{entry}");
        }
    }
}
