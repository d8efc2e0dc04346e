use ab_glyph::FontVec;
use peg_core::{ImageRef, ResponseSpec, Segment, TrialSpec, parse_stimulus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tiny_skia::{
    Color, FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke,
    Transform,
};
use tracing::{debug, warn};

use crate::color::parse_color;
use crate::error::RenderError;
use crate::markup::plain_lines;
use crate::text::{TextStyle, render_text_pixmap};

const STIMULUS_TEXT_PX: f32 = 32.0;
const FEEDBACK_TEXT_PX: f32 = 24.0;
const ENTRY_TEXT_PX: f32 = 24.0;
const LINE_GAP: f32 = 8.0;
const FEEDBACK_MARGIN: f32 = 20.0;
const FEEDBACK_PADDING: (f32, f32) = (12.0, 8.0);
const ENTRY_DEFAULT_WIDTH: f32 = 320.0;
const ENTRY_HEIGHT: f32 = ENTRY_TEXT_PX * 1.6;

/// What the canvas should show.
#[derive(Debug, Clone, Copy)]
pub enum Screen<'a> {
    /// Plain background between phases.
    Blank,
    /// A centred message on the default background.
    Message(&'a str),
    /// A presented trial. `entry` is the typed text of a text-entry trial.
    Trial {
        spec: &'a TrialSpec,
        entry: Option<&'a str>,
    },
    /// The trial stays on screen while its feedback box is visible.
    Feedback {
        spec: &'a TrialSpec,
        message: &'a str,
    },
}

/// One laid out piece of the content block.
enum Item<'p> {
    Owned(Pixmap),
    Scaled { image: &'p Pixmap, size: (u32, u32) },
    Space(f32, f32),
}

impl Item<'_> {
    fn size(&self) -> (f32, f32) {
        match self {
            Item::Owned(pm) => (pm.width() as f32, pm.height() as f32),
            Item::Scaled { size, .. } => (size.0 as f32, size.1 as f32),
            Item::Space(w, h) => (*w, *h),
        }
    }
}

/// Software canvas for trial screens, presented through a pixel buffer.
pub struct StimulusCanvas {
    width: u32,
    height: u32,
    canvas: Pixmap,
    font: FontVec,
    image_dir: PathBuf,
    images: HashMap<String, Pixmap>,
}

impl StimulusCanvas {
    pub fn new(
        width: u32,
        height: u32,
        font: FontVec,
        image_dir: impl Into<PathBuf>,
    ) -> Result<Self, RenderError> {
        let canvas = Pixmap::new(width, height).ok_or(RenderError::Canvas { width, height })?;
        Ok(Self {
            width,
            height,
            canvas,
            font,
            image_dir: image_dir.into(),
            images: HashMap::new(),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        self.canvas = Pixmap::new(width, height).ok_or(RenderError::Canvas { width, height })?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Decodes every referenced image once. Returns how many were newly loaded.
    pub fn preload<'a>(
        &mut self,
        images: impl IntoIterator<Item = &'a ImageRef>,
    ) -> Result<usize, RenderError> {
        let mut loaded = 0;
        for image in images {
            if self.images.contains_key(&image.file) {
                continue;
            }
            let path = self.image_dir.join(&image.file);
            let pixmap = decode_image(&path)?;
            debug!(file = %image.file, width = pixmap.width(), height = pixmap.height(), "image decoded");
            self.images.insert(image.file.clone(), pixmap);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Every image referenced by `specs`, decoded up front.
    pub fn preload_specs<'a>(
        &mut self,
        specs: impl IntoIterator<Item = &'a TrialSpec>,
    ) -> Result<usize, RenderError> {
        let mut refs = Vec::new();
        for spec in specs {
            refs.extend(parse_stimulus(&spec.stimulus)?.images().cloned());
        }
        self.preload(refs.iter())
    }

    pub fn draw(&mut self, screen: Screen<'_>) -> Result<(), RenderError> {
        match screen {
            Screen::Blank => {
                self.canvas.fill(default_background());
            }
            Screen::Message(text) => {
                self.canvas.fill(default_background());
                let style = TextStyle {
                    size_px: STIMULUS_TEXT_PX,
                    color: Color::WHITE,
                };
                let items = self.text_items(text, style);
                let size = stack_size(&items);
                let origin = ((self.width as f32 - size.0) / 2.0, (self.height as f32 - size.1) / 2.0);
                blit_stack(&mut self.canvas, &items, origin, size.0);
            }
            Screen::Trial { spec, entry } => {
                self.draw_trial(spec, entry)?;
            }
            Screen::Feedback { spec, message } => {
                self.draw_trial(spec, None)?;
                self.draw_feedback(message);
            }
        }
        Ok(())
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.canvas
    }

    /// Copies the canvas into an RGBA8 frame of the same size.
    pub fn copy_to(&self, frame: &mut [u8]) {
        let data = self.canvas.data();
        let n = data.len().min(frame.len());
        frame[..n].copy_from_slice(&data[..n]);
    }

    fn draw_trial(&mut self, spec: &TrialSpec, entry: Option<&str>) -> Result<(), RenderError> {
        let background = parse_color(&spec.background_color).unwrap_or_else(|| {
            warn!(color = %spec.background_color, row = spec.row, "unknown background color");
            default_background()
        });
        let foreground = parse_color(&spec.stimulus_color).unwrap_or_else(|| {
            warn!(color = %spec.stimulus_color, row = spec.row, "unknown stimulus color");
            Color::WHITE
        });
        self.canvas.fill(background);

        let stimulus = parse_stimulus(&spec.stimulus)?;
        let style = TextStyle {
            size_px: STIMULUS_TEXT_PX,
            color: foreground,
        };
        let viewport = (self.width, self.height);

        let mut items = Vec::new();
        for segment in &stimulus.segments {
            match segment {
                Segment::Markup(markup) => {
                    items.extend(self.text_items(markup, style));
                }
                Segment::Image(image) => match self.images.get(&image.file) {
                    Some(decoded) => {
                        let size = image.fit((decoded.width(), decoded.height()), viewport);
                        items.push(Item::Scaled {
                            image: decoded,
                            size,
                        });
                    }
                    None => warn!(file = %image.file, "image was not preloaded"),
                },
            }
        }

        let entry_box = match (&spec.response, entry) {
            (ResponseSpec::Text { options }, Some(typed)) => {
                let shown = if typed.is_empty() {
                    options.placeholder.as_deref().unwrap_or("")
                } else {
                    typed
                };
                let width = options
                    .width_px
                    .map(|w| w as f32)
                    .unwrap_or(ENTRY_DEFAULT_WIDTH)
                    .min(self.width as f32 * 0.9);
                let dim = if typed.is_empty() { 0.6 } else { 1.0 };
                let text = render_text_pixmap(
                    shown,
                    &self.font,
                    TextStyle {
                        size_px: ENTRY_TEXT_PX,
                        color: Color::from_rgba(0.0, 0.0, 0.0, dim).unwrap_or(Color::BLACK),
                    },
                );
                Some((width, text))
            }
            _ => None,
        };
        let entry_index = entry_box.as_ref().map(|(width, _)| {
            items.push(Item::Space(0.0, LINE_GAP * 2.0));
            items.push(Item::Space(*width, ENTRY_HEIGHT));
            items.len() - 1
        });

        let size = stack_size(&items);
        let origin = stimulus
            .position
            .anchor((self.width as f32, self.height as f32), size);
        let offsets = blit_stack(&mut self.canvas, &items, origin, size.0);

        if let (Some((width, text)), Some(index)) = (entry_box, entry_index) {
            let top = offsets[index];
            let left = origin.0 + (size.0 - width) / 2.0;
            draw_entry_box(&mut self.canvas, left, top, width, text.as_ref());
        }
        Ok(())
    }

    fn draw_feedback(&mut self, message: &str) {
        let Some(text) = render_text_pixmap(
            message,
            &self.font,
            TextStyle {
                size_px: FEEDBACK_TEXT_PX,
                color: Color::WHITE,
            },
        ) else {
            return;
        };
        let w = text.width() as f32 + FEEDBACK_PADDING.0 * 2.0;
        let h = text.height() as f32 + FEEDBACK_PADDING.1 * 2.0;
        let x = (self.width as f32 - w) / 2.0;
        let y = self.height as f32 - FEEDBACK_MARGIN - h;

        if let Some(rect) = Rect::from_xywh(x, y, w, h) {
            let mut paint = Paint::default();
            paint.set_color_rgba8(0, 0, 0, 153);
            self.canvas.fill_rect(rect, &paint, Transform::identity(), None);
        }
        self.canvas.draw_pixmap(
            (x + FEEDBACK_PADDING.0) as i32,
            (y + FEEDBACK_PADDING.1) as i32,
            text.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    fn text_items(&self, markup: &str, style: TextStyle) -> Vec<Item<'static>> {
        let mut items = Vec::new();
        for line in plain_lines(markup) {
            if !items.is_empty() {
                items.push(Item::Space(0.0, LINE_GAP));
            }
            match render_text_pixmap(&line, &self.font, style) {
                Some(pm) => items.push(Item::Owned(pm)),
                None => items.push(Item::Space(0.0, style.size_px)),
            }
        }
        items
    }
}

fn default_background() -> Color {
    parse_color(TrialSpec::DEFAULT_BACKGROUND_COLOR).unwrap_or(Color::from_rgba8(169, 169, 169, 255))
}

fn stack_size(items: &[Item<'_>]) -> (f32, f32) {
    items.iter().fold((0.0f32, 0.0f32), |(w, h), item| {
        let (iw, ih) = item.size();
        (w.max(iw), h + ih)
    })
}

/// Draws items top to bottom, each centred in a column of `column_width`.
/// Returns the top edge of every item.
fn blit_stack(canvas: &mut Pixmap, items: &[Item<'_>], origin: (f32, f32), column_width: f32) -> Vec<f32> {
    let mut tops = Vec::with_capacity(items.len());
    let mut y = origin.1;
    for item in items {
        tops.push(y);
        let (w, h) = item.size();
        let x = origin.0 + (column_width - w) / 2.0;
        match item {
            Item::Owned(pm) => {
                canvas.draw_pixmap(
                    x.round() as i32,
                    y.round() as i32,
                    pm.as_ref(),
                    &PixmapPaint::default(),
                    Transform::identity(),
                    None,
                );
            }
            Item::Scaled { image, size } => {
                let sx = size.0 as f32 / image.width() as f32;
                let sy = size.1 as f32 / image.height() as f32;
                let paint = PixmapPaint {
                    quality: FilterQuality::Bilinear,
                    ..PixmapPaint::default()
                };
                canvas.draw_pixmap(
                    0,
                    0,
                    image.as_ref(),
                    &paint,
                    Transform::from_scale(sx, sy).post_translate(x.round(), y.round()),
                    None,
                );
            }
            Item::Space(..) => {}
        }
        y += h;
    }
    tops
}

fn draw_entry_box(canvas: &mut Pixmap, x: f32, y: f32, width: f32, text: Option<&Pixmap>) {
    let height = ENTRY_HEIGHT;
    let Some(rect) = Rect::from_xywh(x, y, width, height) else {
        return;
    };
    let mut paint = Paint::default();
    paint.set_color(Color::WHITE);
    canvas.fill_rect(rect, &paint, Transform::identity(), None);

    let path = PathBuilder::from_rect(rect);
    paint.set_color_rgba8(60, 60, 60, 255);
    paint.anti_alias = true;
    canvas.stroke_path(
        &path,
        &paint,
        &Stroke {
            width: 1.5,
            ..Stroke::default()
        },
        Transform::identity(),
        None,
    );

    if let Some(text) = text {
        let pad = 8.0;
        let ty = y + (height - text.height() as f32) / 2.0;
        // Clip long input to the box by drawing only its tail.
        let overflow = (text.width() as f32 - (width - pad * 2.0)).max(0.0);
        let clip = Rect::from_xywh(x + pad, y, width - pad * 2.0, height)
            .and_then(|r| {
                let mut mask = tiny_skia::Mask::new(canvas.width(), canvas.height())?;
                let clip_path = PathBuilder::from_rect(r);
                mask.fill_path(&clip_path, FillRule::Winding, false, Transform::identity());
                Some(mask)
            });
        canvas.draw_pixmap(
            (x + pad - overflow) as i32,
            ty as i32,
            text.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            clip.as_ref(),
        );
    }
}

fn decode_image(path: &Path) -> Result<Pixmap, RenderError> {
    let rgba = image::open(path)
        .map_err(|source| RenderError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width.max(1), height.max(1)).ok_or(RenderError::Canvas { width, height })?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = tiny_skia::ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}
