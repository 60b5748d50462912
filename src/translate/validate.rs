use crate::filter::halves_repeat;

/// Output shorter than this is too short to loop meaningfully.
const MIN_CHECKED_CHARS: usize = 50;
const WINDOW_WORDS: usize = 4;
const MAX_WINDOW_REPEATS: usize = 3;

/// Detects decoding loops in model output.
pub fn is_hallucinated(text: &str) -> bool {
    if text.chars().count() <= MIN_CHECKED_CHARS {
        return false;
    }
    halves_repeat(text) || has_repeating_window(text)
}

fn has_repeating_window(text: &str) -> bool {
    let words = text.split_whitespace().collect::<Vec<_>>();
    if words.len() < WINDOW_WORDS {
        return false;
    }
    let normalized = words.join(" ");
    words.windows(WINDOW_WORDS).any(|window| {
        let needle = window.join(" ");
        normalized.matches(needle.as_str()).count() >= MAX_WINDOW_REPEATS
    })
}
