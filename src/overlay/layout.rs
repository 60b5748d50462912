use crate::filter::is_cjk;

pub(crate) const MIN_FONT_SIZE: f32 = 10.0;
pub(crate) const LINE_HEIGHT_RATIO: f32 = 1.1;
const SPACE_UNITS: f32 = 0.3;

/// Wrapped text that fits inside a box.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FittedText {
    pub(crate) font_size: f32,
    pub(crate) lines: Vec<String>,
}

/// Shrinks the font from `base_size` until the wrapped text fits `inner_w` x
/// `inner_h`, or the minimum size is reached.
pub(crate) fn fit_text(text: &str, base_size: f32, inner_w: f32, inner_h: f32) -> FittedText {
    let mut font_size = base_size.min(inner_h.max(MIN_FONT_SIZE)).max(MIN_FONT_SIZE);
    let max_lines = if text.chars().any(is_cjk) { 4 } else { 3 };
    let mut lines = wrap_text(text, (inner_w / font_size).max(1.0));

    for _ in 0..8 {
        let block_height = lines.len() as f32 * font_size * LINE_HEIGHT_RATIO;
        let fits_height = block_height <= inner_h;
        if (lines.len() <= max_lines && fits_height) || font_size <= MIN_FONT_SIZE {
            break;
        }
        let by_lines = if lines.len() > max_lines {
            max_lines as f32 / lines.len() as f32
        } else {
            1.0
        };
        let by_height = if fits_height {
            1.0
        } else {
            inner_h / block_height
        };
        font_size = (font_size * by_lines.min(by_height).min(0.92)).max(MIN_FONT_SIZE);
        lines = wrap_text(text, (inner_w / font_size).max(1.0));
    }

    FittedText { font_size, lines }
}

/// Greedy wrap where `max_units` is measured in em widths.
pub(crate) fn wrap_text(text: &str, max_units: f32) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut units = 0.0;

    for token in tokenize(text) {
        if token == "\n" {
            if !current.trim().is_empty() {
                result.push(current.trim_end().to_string());
            }
            current.clear();
            units = 0.0;
            continue;
        }
        if token == " " {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
                units += SPACE_UNITS;
            }
            continue;
        }
        let token_units = text_units(&token);
        if units + token_units > max_units && !current.trim().is_empty() {
            result.push(current.trim_end().to_string());
            current.clear();
            units = 0.0;
        }
        current.push_str(&token);
        units += token_units;
    }
    if !current.trim().is_empty() {
        result.push(current.trim_end().to_string());
    }
    if result.is_empty() {
        result.push(text.trim().to_string());
    }
    result
}

pub(crate) fn text_units(text: &str) -> f32 {
    text.chars().map(char_units).sum()
}

fn char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if is_cjk(ch) {
        1.0
    } else {
        0.9
    }
}

/// Words stay whole; every CJK character is its own break opportunity.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == '\n' || ch.is_whitespace() || is_cjk(ch) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(match ch {
                '\n' => "\n".to_string(),
                ch if ch.is_whitespace() => " ".to_string(),
                ch => ch.to_string(),
            });
            continue;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_latin_on_word_boundaries() {
        let lines = wrap_text("the quick brown fox", 5.0);
        assert_eq!(lines, vec!["the quick", "brown fox"]);
    }

    #[test]
    fn breaks_cjk_between_characters() {
        let lines = wrap_text("こんにちは世界", 3.0);
        assert_eq!(lines, vec!["こんに", "ちは世", "界"]);
    }

    #[test]
    fn shrinks_until_the_block_fits() {
        let fitted = fit_text(
            "a fairly long sentence that needs several lines to fit",
            40.0,
            120.0,
            40.0,
        );
        assert!(fitted.font_size < 40.0);
        assert!(fitted.font_size >= MIN_FONT_SIZE);
        assert!(!fitted.lines.is_empty());
    }

    #[test]
    fn short_text_keeps_the_base_size() {
        let fitted = fit_text("Hello", 14.0, 200.0, 60.0);
        assert_eq!(fitted.font_size, 14.0);
        assert_eq!(fitted.lines, vec!["Hello"]);
    }
}
