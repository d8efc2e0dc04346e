//! Reduces trusted stimulus markup to plain lines for the native canvas.
//! The browser artifact shows markup as-is; the canvas only draws text.

const LINE_BREAKS: &[&str] = &["br", "br/", "p", "/p", "div", "/div", "h1", "/h1", "h2", "/h2", "h3", "/h3", "li"];

/// Splits markup into display lines: `<br>` and block tags break lines,
/// other tags are dropped, and common entities are decoded.
pub fn plain_lines(markup: &str) -> Vec<String> {
    let mut lines = vec![String::new()];
    let mut rest = markup;

    while let Some(open) = rest.find('<') {
        push_text(&mut lines, &rest[..open]);
        let Some(close) = rest[open..].find('>') else {
            push_text(&mut lines, &rest[open..]);
            rest = "";
            break;
        };
        let tag = rest[open + 1..open + close].trim().to_ascii_lowercase();
        let name = tag.split_whitespace().next().unwrap_or_default();
        if LINE_BREAKS.contains(&name) {
            lines.push(String::new());
        }
        rest = &rest[open + close + 1..];
    }
    push_text(&mut lines, rest);

    lines
        .into_iter()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect()
}

fn push_text(lines: &mut Vec<String>, text: &str) {
    let decoded = decode_entities(text);
    let mut parts = decoded.split('\n');
    if let (Some(first), Some(last)) = (parts.next(), lines.last_mut()) {
        last.push_str(first);
    }
    lines.extend(parts.map(str::to_string));
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_dropped_and_breaks_split() {
        assert_eq!(
            plain_lines("<b>Press F</b> for <i>faces</i><br>J for houses"),
            vec!["Press F for faces", "J for houses"]
        );
        assert_eq!(plain_lines("<h2>Welcome</h2><p>Ready?</p>"), vec!["Welcome", "Ready?"]);
    }

    #[test]
    fn entities_and_stray_brackets() {
        assert_eq!(plain_lines("5 &lt; 7 &amp;&amp; 3 > 2"), vec!["5 < 7 && 3 > 2"]);
        assert_eq!(plain_lines("a < b"), vec!["a < b"]);
        assert!(plain_lines("   ").is_empty());
    }
}
