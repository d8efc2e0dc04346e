use serde::{Deserialize, Serialize};

use crate::Parsed;

/// Marker that turns a trial into a free-text entry trial.
pub const TEXT_ENTRY_MARKER: &str = "[text";

/// On key trials that also time out, keys are only taken this long after onset.
pub const KEY_GRACE_MS: u64 = 50;

/// How a trial accepts a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResponseSpec {
    /// `NA`: the trial only ends through its latency.
    None,
    /// Comma separated list of accepted keys.
    Keys { keys: Vec<KeyToken> },
    /// `[text]` or `[text(placeholder=..., maxlength=N, width=N)]`.
    Text { options: TextEntryOptions },
}

/// A key as authored in the table, e.g. `space`, `f`, `lshift`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyToken(pub String);

impl KeyToken {
    pub fn normalized(&self) -> String {
        normalize_key(&self.0)
    }

    pub fn matches(&self, key: &str) -> bool {
        self.normalized() == normalize_key(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEntryOptions {
    pub placeholder: Option<String>,
    pub max_length: Option<u32>,
    pub width_px: Option<u32>,
}

/// Lowercases a key name and folds the aliases authors use for modifier keys.
pub fn normalize_key(name: &str) -> String {
    if name == " " {
        return " ".to_string();
    }
    let lower = name.trim().to_lowercase();
    match lower.as_str() {
        "space" | "spacebar" => " ".to_string(),
        "ctrl" | "control" => "control".to_string(),
        "lshift" | "rshift" | "shift" => "shift".to_string(),
        _ => lower,
    }
}

/// `NA` in any case marks an absent value.
pub fn is_na(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("na")
}

impl ResponseSpec {
    pub fn parse(raw: &str) -> Parsed<Self> {
        let raw = raw.trim();
        if raw.is_empty() || is_na(raw) {
            return Parsed::clean(Self::None);
        }
        if raw.starts_with(TEXT_ENTRY_MARKER) {
            let Parsed { value, ignored } = parse_text_options(raw);
            return Parsed {
                value: Self::Text { options: value },
                ignored,
            };
        }
        let keys = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| KeyToken(k.to_string()))
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return Parsed::clean(Self::None);
        }
        Parsed::clean(Self::Keys { keys })
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Authored key tokens, exact and trimmed. Empty for non-key trials.
    pub fn key_options(&self) -> Vec<&str> {
        match self {
            Self::Keys { keys } => keys.iter().map(|k| k.0.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn accepts_key(&self, key: &str) -> bool {
        match self {
            Self::Keys { keys } => keys.iter().any(|k| k.matches(key)),
            _ => false,
        }
    }
}

fn parse_text_options(raw: &str) -> Parsed<TextEntryOptions> {
    let mut options = TextEntryOptions::default();
    let mut ignored = Vec::new();

    let (Some(open), Some(close)) = (raw.find('('), raw.rfind(')')) else {
        return Parsed::clean(options);
    };
    if close <= open {
        return Parsed::clean(options);
    }

    for token in raw[open + 1..close].split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        let Some((key, value)) = token.split_once('=') else {
            ignored.push(token.to_string());
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        match key.trim().to_lowercase().as_str() {
            "placeholder" => options.placeholder = Some(value.to_string()),
            "maxlength" => match value.parse() {
                Ok(n) => options.max_length = Some(n),
                Err(_) => ignored.push(token.to_string()),
            },
            "width" => match value.parse() {
                Ok(n) => options.width_px = Some(n),
                Err(_) => ignored.push(token.to_string()),
            },
            _ => ignored.push(token.to_string()),
        }
    }

    Parsed {
        value: options,
        ignored,
    }
}
