//! Stimulus strings: plain (trusted) markup with inline image directives.
//!
//! A directive looks like `[image:face.png]` or `[image:face.png(top, left, width=200)]`.
//! Bare flags `top`/`bottom`/`left`/`right`/`center` place the stimulus on screen,
//! `width=N`/`height=N` size the image box. Flags may be joined with `-`, so
//! `top-left` is two flags. When a stimulus holds several directives, the last
//! one decides the position.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const DIRECTIVE_OPEN: &str = "[image:";

/// Largest share of the viewport an image may cover in either dimension.
pub const MAX_VIEWPORT_FRACTION: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vertical {
    Top,
    #[default]
    Center,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizontal {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub vertical: Vertical,
    pub horizontal: Horizontal,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = match self.vertical {
            Vertical::Top => "top",
            Vertical::Center => "center",
            Vertical::Bottom => "bottom",
        };
        let h = match self.horizontal {
            Horizontal::Left => "left",
            Horizontal::Center => "center",
            Horizontal::Right => "right",
        };
        write!(f, "{v}-{h}")
    }
}

impl Position {
    /// Anchor of a `content` box inside a `frame`, both in pixels.
    pub fn anchor(&self, frame: (f32, f32), content: (f32, f32)) -> (f32, f32) {
        let x = match self.horizontal {
            Horizontal::Left => 0.0,
            Horizontal::Center => (frame.0 - content.0) / 2.0,
            Horizontal::Right => frame.0 - content.0,
        };
        let y = match self.vertical {
            Vertical::Top => 0.0,
            Vertical::Center => (frame.1 - content.1) / 2.0,
            Vertical::Bottom => frame.1 - content.1,
        };
        (x.max(0.0), y.max(0.0))
    }
}

/// An image placed by a directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Bare filename, resolved against the image directory.
    pub file: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageRef {
    /// Box size for an image with `natural` pixel size on a `viewport`. Requested
    /// sizes win over the natural size; the result never exceeds
    /// [`MAX_VIEWPORT_FRACTION`] of the viewport and keeps its aspect ratio when scaled down.
    pub fn fit(&self, natural: (u32, u32), viewport: (u32, u32)) -> (u32, u32) {
        let (nw, nh) = (natural.0.max(1) as f32, natural.1.max(1) as f32);
        let (w, h) = match (self.width, self.height) {
            (Some(w), Some(h)) => (w as f32, h as f32),
            (Some(w), None) => (w as f32, nh * w as f32 / nw),
            (None, Some(h)) => (nw * h as f32 / nh, h as f32),
            (None, None) => (nw, nh),
        };
        let max_w = viewport.0 as f32 * MAX_VIEWPORT_FRACTION;
        let max_h = viewport.1 as f32 * MAX_VIEWPORT_FRACTION;
        let scale = (max_w / w).min(max_h / h).min(1.0);
        (
            (w * scale).round().max(1.0) as u32,
            (h * scale).round().max(1.0) as u32,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Segment {
    /// Passed through verbatim.
    Markup(String),
    Image(ImageRef),
}

/// A stimulus split into displayable segments plus its screen position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedStimulus {
    pub segments: Vec<Segment>,
    pub position: Position,
    /// Directive option tokens that were not recognised.
    #[serde(skip)]
    pub ignored: Vec<String>,
}

impl ParsedStimulus {
    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Image(img) => Some(img),
            Segment::Markup(_) => None,
        })
    }

    /// Markup with every image directive removed.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Markup(m) => Some(m.as_str()),
                Segment::Image(_) => None,
            })
            .collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("image {file}: {key} must be a whole number of pixels, got {value:?}")]
    InvalidSize {
        file: String,
        key: &'static str,
        value: String,
    },
}

/// Splits a raw stimulus into markup and image segments.
pub fn parse_stimulus(raw: &str) -> Result<ParsedStimulus, DirectiveError> {
    let mut parsed = ParsedStimulus::default();
    let mut markup = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find(DIRECTIVE_OPEN) {
        let body = &rest[start + DIRECTIVE_OPEN.len()..];
        let Some((directive, consumed)) = scan_directive(body) else {
            // Not a directive: keep the opener as text and continue after it.
            markup.push_str(&rest[..start + DIRECTIVE_OPEN.len()]);
            rest = body;
            continue;
        };

        markup.push_str(&rest[..start]);
        if !markup.is_empty() {
            parsed.segments.push(Segment::Markup(std::mem::take(&mut markup)));
        }

        let (image, position) = apply_options(directive.file, directive.options, &mut parsed.ignored)?;
        parsed.segments.push(Segment::Image(image));
        parsed.position = position;

        rest = &body[consumed..];
    }

    markup.push_str(rest);
    if !markup.is_empty() {
        parsed.segments.push(Segment::Markup(markup));
    }
    Ok(parsed)
}

struct RawDirective<'a> {
    file: &'a str,
    options: Option<&'a str>,
}

/// Scans `name]` or `name(options)]`; returns the directive and bytes consumed.
fn scan_directive(body: &str) -> Option<(RawDirective<'_>, usize)> {
    let name_end = body.find(['(', ')', ']'])?;
    let file = body[..name_end].trim();
    if file.is_empty() {
        return None;
    }
    match body.as_bytes()[name_end] {
        b']' => Some((RawDirective { file, options: None }, name_end + 1)),
        b'(' => {
            let close = body[name_end..].find(")]")? + name_end;
            Some((
                RawDirective {
                    file,
                    options: Some(&body[name_end + 1..close]),
                },
                close + 2,
            ))
        }
        _ => None,
    }
}

fn apply_options(
    file: &str,
    options: Option<&str>,
    ignored: &mut Vec<String>,
) -> Result<(ImageRef, Position), DirectiveError> {
    let mut image = ImageRef {
        file: file.to_string(),
        width: None,
        height: None,
    };
    let mut position = Position::default();

    let tokens = options
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty());

    for token in tokens {
        if let Some((key, value)) = token.split_once('=') {
            let value = value.trim().trim_matches('\'').trim_matches('"');
            let key = key.trim().to_lowercase();
            let (target, name) = match key.as_str() {
                "width" => (&mut image.width, "width"),
                "height" => (&mut image.height, "height"),
                _ => {
                    ignored.push(token.to_string());
                    continue;
                }
            };
            let pixels: u32 = value.parse().map_err(|_| DirectiveError::InvalidSize {
                file: file.to_string(),
                key: name,
                value: value.to_string(),
            })?;
            *target = Some(pixels);
            continue;
        }

        for word in token
            .split(['-', '_', ' '])
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
        {
            match word.as_str() {
                "top" => position.vertical = Vertical::Top,
                "bottom" => position.vertical = Vertical::Bottom,
                "left" => position.horizontal = Horizontal::Left,
                "right" => position.horizontal = Horizontal::Right,
                "center" | "centre" | "middle" => {}
                _ => ignored.push(word),
            }
        }
    }

    Ok((image, position))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let parsed = parse_stimulus("<b>Press F</b> for faces").unwrap();
        assert_eq!(
            parsed.segments,
            vec![Segment::Markup("<b>Press F</b> for faces".into())]
        );
        assert_eq!(parsed.position, Position::default());
        assert_eq!(parsed.position.to_string(), "center-center");
    }

    #[test]
    fn directive_is_replaced_in_place() {
        let parsed = parse_stimulus("Look: [image:face.png(top, width=200)] now").unwrap();
        assert_eq!(parsed.segments.len(), 3);
        assert_eq!(parsed.segments[0], Segment::Markup("Look: ".into()));
        assert_eq!(
            parsed.segments[1],
            Segment::Image(ImageRef {
                file: "face.png".into(),
                width: Some(200),
                height: None,
            })
        );
        assert_eq!(parsed.segments[2], Segment::Markup(" now".into()));
        assert_eq!(parsed.position.to_string(), "top-center");
        assert_eq!(parsed.text(), "Look:  now");
    }

    #[test]
    fn last_directive_sets_position() {
        let parsed = parse_stimulus("[image:a.png(bottom-right)][image:b.png(left)]").unwrap();
        assert_eq!(parsed.images().count(), 2);
        assert_eq!(
            parsed.position,
            Position {
                vertical: Vertical::Center,
                horizontal: Horizontal::Left,
            }
        );
    }

    #[test]
    fn unknown_options_are_collected() {
        let parsed = parse_stimulus("[image:a.png(top, spin, alt=x)]").unwrap();
        assert_eq!(parsed.ignored, vec!["spin".to_string(), "alt=x".to_string()]);
        assert_eq!(parsed.position.vertical, Vertical::Top);
    }

    #[test]
    fn bad_size_is_an_error() {
        let err = parse_stimulus("[image:a.png(height=tall)]").unwrap_err();
        assert_eq!(
            err,
            DirectiveError::InvalidSize {
                file: "a.png".into(),
                key: "height",
                value: "tall".into(),
            }
        );
    }

    #[test]
    fn unterminated_directive_stays_text() {
        let parsed = parse_stimulus("see [image:broken").unwrap();
        assert_eq!(parsed.images().count(), 0);
        assert_eq!(parsed.text(), "see [image:broken");
    }

    #[test]
    fn fit_bounds_to_viewport() {
        let img = ImageRef {
            file: "a.png".into(),
            width: Some(4000),
            height: None,
        };
        // 4000 wide at 2:1 aspect on a 1000x1000 viewport clamps to 900x450.
        assert_eq!(img.fit((2000, 1000), (1000, 1000)), (900, 450));

        let natural = ImageRef {
            file: "a.png".into(),
            width: None,
            height: None,
        };
        assert_eq!(natural.fit((300, 200), (1920, 1080)), (300, 200));
    }

    #[test]
    fn anchor_follows_position() {
        let pos = Position {
            vertical: Vertical::Bottom,
            horizontal: Horizontal::Right,
        };
        assert_eq!(pos.anchor((100.0, 50.0), (20.0, 10.0)), (80.0, 40.0));
        assert_eq!(Position::default().anchor((100.0, 50.0), (20.0, 10.0)), (40.0, 20.0));
    }
}
