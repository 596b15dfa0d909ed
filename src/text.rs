//! Text hygiene helpers shared by the embedding client and the answer
//! generator.

/// Removes control characters other than `\n` and `\t`.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Returns the longest prefix of at most `max_chars` characters, preferring
/// to end on whitespace when one exists in the second half of the prefix.
pub fn truncate_at_word(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let prefix = &text[..cut];
    match prefix.rfind(char::is_whitespace) {
        Some(ws) if prefix[..ws].chars().count() >= max_chars / 2 => &prefix[..ws],
        _ => prefix,
    }
}

/// Characters-per-token ratio: 3 for mostly-Cyrillic text, 4 otherwise.
fn chars_per_token(text: &str) -> usize {
    let total = text.chars().count();
    let cyrillic = text
        .chars()
        .filter(|c| ('\u{0400}'..='\u{04FF}').contains(c))
        .count();
    if cyrillic * 10 > total * 3 {
        3
    } else {
        4
    }
}

/// Rough token count: `chars / 3` when more than 30% of the text is
/// Cyrillic, else `chars / 4`. At least 1 for non-empty text.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    (chars / chars_per_token(text)).max(1)
}

/// Cuts `text` so that [`estimate_tokens`] stays within `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    if estimate_tokens(text) <= max_tokens {
        return text;
    }
    truncate_at_word(text, max_tokens * chars_per_token(text))
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn line_count(text: &str) -> usize {
    text.lines().count()
}
