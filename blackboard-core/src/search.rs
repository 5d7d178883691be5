//! Substring-biased fuzzy scoring ("partial ratio" semantics).
//!
//! A whole-string similarity ratio (e.g. `strsim::normalized_levenshtein`
//! applied directly) badly under-scores a short query against a much
//! longer message, because the denominator includes all the text the query
//! never intended to match. Partial-ratio scoring instead slides the
//! (shorter) query across the longer text and reports the best-matching
//! window, so "python" scores ~100 against "Python programming language"
//! rather than the ~35 a whole-string ratio would give it.

/// Score `query` against `text` on a 0-100 scale using partial-ratio
/// semantics: the best substring match of `query`'s length within `text`,
/// compared case-insensitively.
pub fn partial_ratio(query: &str, text: &str) -> u32 {
    let query = query.to_lowercase();
    let text = text.to_lowercase();

    if query.is_empty() {
        return 0;
    }
    if text.is_empty() {
        return 0;
    }

    let query_chars: Vec<char> = query.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    // The query is the "short" side: if text is shorter than query, swap
    // roles so we always slide the shorter string across the longer one.
    let (short, long) = if query_chars.len() <= text_chars.len() {
        (&query_chars, &text_chars)
    } else {
        (&text_chars, &query_chars)
    };

    if short.len() == long.len() {
        return whole_ratio(short, long);
    }

    let window = short.len();
    let mut best = 0u32;
    for start in 0..=(long.len() - window) {
        let candidate: String = long[start..start + window].iter().collect();
        let short_str: String = short.iter().collect();
        let score = whole_ratio_str(&short_str, &candidate);
        if score > best {
            best = score;
        }
        if best == 100 {
            break;
        }
    }
    best
}

fn whole_ratio(a: &[char], b: &[char]) -> u32 {
    let a: String = a.iter().collect();
    let b: String = b.iter().collect();
    whole_ratio_str(&a, &b)
}

fn whole_ratio_str(a: &str, b: &str) -> u32 {
    let ratio = strsim::normalized_levenshtein(a, b);
    (ratio * 100.0).round() as u32
}
