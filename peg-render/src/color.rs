use tiny_skia::Color;

const NAMED: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 128, 0]),
    ("lime", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("orange", [255, 165, 0]),
    ("purple", [128, 0, 128]),
    ("magenta", [255, 0, 255]),
    ("fuchsia", [255, 0, 255]),
    ("cyan", [0, 255, 255]),
    ("aqua", [0, 255, 255]),
    ("pink", [255, 192, 203]),
    ("brown", [165, 42, 42]),
    ("navy", [0, 0, 128]),
    ("teal", [0, 128, 128]),
    ("olive", [128, 128, 0]),
    ("maroon", [128, 0, 0]),
    ("silver", [192, 192, 192]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("darkgray", [169, 169, 169]),
    ("darkgrey", [169, 169, 169]),
    ("lightgray", [211, 211, 211]),
    ("lightgrey", [211, 211, 211]),
    ("dimgray", [105, 105, 105]),
    ("dimgrey", [105, 105, 105]),
    ("darkred", [139, 0, 0]),
    ("darkgreen", [0, 100, 0]),
    ("darkblue", [0, 0, 139]),
    ("gold", [255, 215, 0]),
    ("violet", [238, 130, 238]),
];

/// Parses the CSS color forms authors type into the table: names, `#rgb`,
/// `#rrggbb` and `rgb(r, g, b)`.
pub fn parse_color(raw: &str) -> Option<Color> {
    let raw = raw.trim().to_ascii_lowercase();
    if let Some(hex) = raw.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = raw.strip_prefix("rgb(").and_then(|r| r.strip_suffix(')')) {
        let parts: Vec<u8> = args
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .ok()?;
        return match parts.as_slice() {
            [r, g, b] => Some(Color::from_rgba8(*r, *g, *b, 255)),
            _ => None,
        };
    }
    NAMED
        .iter()
        .find(|(name, _)| *name == raw)
        .map(|(_, [r, g, b])| Color::from_rgba8(*r, *g, *b, 255))
}

fn parse_hex(hex: &str) -> Option<Color> {
    let digit = |i: usize, len: usize| u8::from_str_radix(hex.get(i..i + len)?, 16).ok();
    match hex.len() {
        3 => {
            let [r, g, b] = [digit(0, 1)?, digit(1, 1)?, digit(2, 1)?];
            Some(Color::from_rgba8(r * 17, g * 17, b * 17, 255))
        }
        6 => Some(Color::from_rgba8(digit(0, 2)?, digit(2, 2)?, digit(4, 2)?, 255)),
        _ => None,
    }
}
