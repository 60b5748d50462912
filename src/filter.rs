//! Quality gate for recognized and translated strings.

use crate::translate::is_hallucinated;

/// Outputs small translation models fall back to when the input is noise.
const BLACKLIST: &[&str] = &[
    "thank you for watching",
    "thanks for watching",
    "please subscribe",
    "subtitles by the amara.org community",
    "translated by",
    "i don't know",
    "you know what",
    "oh my god",
    "uh-huh",
    "mm-hmm",
    "hmm",
    "huh",
    "...",
    "…",
];

/// Collapses whitespace runs into a single space and trims the ends.
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_garbage(text: &str) -> bool {
    let text = normalize_text(text);
    let chars = text
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<Vec<_>>();

    if chars.len() < 2 && !chars.iter().any(|ch| is_word_char(*ch)) {
        return true;
    }
    if chars.iter().all(|ch| !is_word_char(*ch)) {
        return true;
    }
    if chars.len() > 3 && chars.iter().all(|ch| *ch == chars[0]) {
        return true;
    }
    if is_blacklisted(&text) {
        return true;
    }
    halves_repeat(&text)
}

/// Stricter gate for model output: the base filter plus loop detection.
pub fn is_garbage_translation(text: &str) -> bool {
    is_garbage(text) || is_hallucinated(text)
}

pub fn is_blacklisted(text: &str) -> bool {
    let lowered = normalize_text(text).to_lowercase();
    let stripped = lowered.trim_end_matches(['.', '!', '?', '。', '！', '？']);
    BLACKLIST
        .iter()
        .any(|phrase| lowered == *phrase || (!stripped.is_empty() && stripped == *phrase))
}

/// True when the word list (more than six words) is its own first half twice.
pub fn halves_repeat(text: &str) -> bool {
    let words = text.split_whitespace().collect::<Vec<_>>();
    if words.len() <= 6 {
        return false;
    }
    let half = words.len() / 2;
    words[..half] == words[half..half * 2]
}

pub fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3040..=0x30FF
            | 0x31F0..=0x31FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xAC00..=0xD7AF
            | 0xF900..=0xFAFF
            | 0xFF66..=0xFF9F
    )
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || is_cjk(ch)
}
