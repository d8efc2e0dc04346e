use ab_glyph::{Font, FontVec, Glyph, PxScale, ScaleFont, point};
use std::fs;
use std::path::{Path, PathBuf};
use tiny_skia::{Color, Pixmap, PremultipliedColorU8};

use crate::error::RenderError;

/// Fonts tried when none is configured.
pub const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn load_font(path: impl AsRef<Path>) -> Result<FontVec, RenderError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| RenderError::Font {
        path: path.to_path_buf(),
    })
}

/// First entry of [`SYSTEM_FONTS`] that exists.
pub fn find_system_font() -> Option<PathBuf> {
    SYSTEM_FONTS.iter().map(PathBuf::from).find(|p| p.is_file())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub size_px: f32,
    pub color: Color,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            size_px: 32.0,
            color: Color::WHITE,
        }
    }
}

/// Rasterizes one line into a tightly sized transparent pixmap.
/// `None` when the line has no visible glyphs.
pub fn render_text_pixmap<F: Font>(text: &str, font: &F, style: TextStyle) -> Option<Pixmap> {
    let scale = PxScale::from(style.size_px);
    let sf = font.as_scaled(scale);

    let mut pen_x = 0.0f32;
    let mut glyphs = Vec::<Glyph>::new();
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = glyphs.last() {
            pen_x += sf.kern(prev.id, id);
        }
        glyphs.push(Glyph {
            id,
            scale,
            position: point(pen_x, sf.ascent()),
        });
        pen_x += sf.h_advance(id);
    }

    // The pixmap spans ascent to descent so stacked lines share a baseline grid.
    let outlines: Vec<_> = glyphs
        .into_iter()
        .filter_map(|g| font.outline_glyph(g))
        .collect();
    if outlines.is_empty() {
        return None;
    }
    let min_x = outlines
        .iter()
        .map(|o| o.px_bounds().min.x)
        .fold(f32::INFINITY, f32::min)
        .min(0.0);
    let max_x = outlines
        .iter()
        .map(|o| o.px_bounds().max.x)
        .fold(pen_x, f32::max);
    let height = (sf.ascent() - sf.descent()).ceil().max(1.0) as u32;
    let width = (max_x.ceil() - min_x.floor()).max(1.0) as u32;

    let mut pm = Pixmap::new(width, height)?;
    let stride = width as usize;
    let dst = pm.pixels_mut();
    let c = style.color.to_color_u8();

    for out in &outlines {
        let b = out.px_bounds();
        out.draw(|x, y, cov| {
            if cov <= f32::EPSILON {
                return;
            }
            let ix = (x as f32 + b.min.x - min_x.floor()) as i32;
            let iy = (y as f32 + b.min.y) as i32;
            if ix < 0 || iy < 0 || ix >= width as i32 || iy >= height as i32 {
                return;
            }
            let i = iy as usize * stride + ix as usize;

            // Source-over in premultiplied space.
            let a = (cov * c.alpha() as f32 / 255.0).clamp(0.0, 1.0);
            let inv = 1.0 - a;
            let bg = dst[i];
            let blend = |s: u8, d: u8| ((s as f32 * a) + d as f32 * inv).round().min(255.0) as u8;
            let alpha = blend(255, bg.alpha());
            let px = PremultipliedColorU8::from_rgba(
                blend(c.red(), bg.red()).min(alpha),
                blend(c.green(), bg.green()).min(alpha),
                blend(c.blue(), bg.blue()).min(alpha),
                alpha,
            );
            if let Some(px) = px {
                dst[i] = px;
            }
        });
    }

    Some(pm)
}
