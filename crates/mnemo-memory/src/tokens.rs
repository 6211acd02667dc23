//! Token estimation heuristics.
//!
//! All budget arithmetic in this crate runs on estimates, not exact tokenizer
//! output. The heuristic is word-count based with a CJK-aware fallback:
//! whitespace-splitting undercounts scripts written without spaces, so CJK
//! characters are counted individually.

/// Multiplier applied to the word count (English averages ~1.3 tokens/word).
const TOKENS_PER_WORD: f64 = 1.3;

/// Estimate the token count of a string.
///
/// Counts whitespace-separated words at ~1.3 tokens each, rounded up, plus
/// one token per CJK character. Empty and whitespace-only input estimates
/// to zero.
pub fn estimate_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }

    let cjk_chars = text.chars().filter(|c| is_cjk(*c)).count();

    let word_count = text
        .split_whitespace()
        .filter(|w| !w.chars().all(is_cjk))
        .count();

    (word_count as f64 * TOKENS_PER_WORD).ceil() as usize + cjk_chars
}

/// Estimate total tokens across multiple texts.
pub fn estimate_tokens_all<'a>(texts: impl IntoIterator<Item = &'a str>) -> usize {
    texts.into_iter().map(estimate_tokens).sum()
}

/// Whether a character belongs to a CJK script.
fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF      // CJK Unified Ideographs
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x3040..=0x309F    // Hiragana
        | 0x30A0..=0x30FF    // Katakana
        | 0xAC00..=0xD7AF    // Hangul Syllables
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
    )
}
