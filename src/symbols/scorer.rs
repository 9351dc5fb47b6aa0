// =============================================================================
// String Scorer — additive fuzzy similarity for symbol lookup
// =============================================================================
//
//   score = 5.0 (exact) + 3.0 (prefix) + 1.5 (substring)
//         + max(0, 3 − 0.5 × levenshtein)
//
// Comparison is case-insensitive. The terms are cumulative, so an exact match
// also collects the prefix, substring and distance bonuses (12.5 total).
// =============================================================================

const EXACT_BONUS: f64 = 5.0;
const PREFIX_BONUS: f64 = 3.0;
const SUBSTRING_BONUS: f64 = 1.5;
const DISTANCE_CEILING: f64 = 3.0;
const DISTANCE_PENALTY: f64 = 0.5;

/// Similarity of `needle` against `haystack`. Always `>= 0`; an empty needle
/// scores zero.
pub fn string_score(haystack: &str, needle: &str) -> f64 {
    let h = haystack.to_lowercase();
    let n = needle.to_lowercase();
    if n.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;
    if h == n {
        score += EXACT_BONUS;
    }
    if h.starts_with(&n) {
        score += PREFIX_BONUS;
    }
    if h.contains(&n) {
        score += SUBSTRING_BONUS;
    }

    let distance = levenshtein(&h, &n) as f64;
    score += (DISTANCE_CEILING - distance * DISTANCE_PENALTY).max(0.0);
    score
}

/// Classic Levenshtein distance over `char`s (unit insert/delete/substitute).
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row DP; `prev[j]` is the distance between a[..i] and b[..j].
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_known_values() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn exact_match_collects_every_bonus() {
        let s = string_score("BTCUSDT", "btcusdt");
        assert!((s - 12.5).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn prefix_match_scoring() {
        // prefix 3 + substring 1.5 + max(0, 3 - 0.5 * 3) = 6.0
        let s = string_score("EURUSD", "EUR");
        assert!((s - 6.0).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn substring_only_scoring() {
        // substring 1.5 + max(0, 3 - 0.5 * 3) = 3.0
        let s = string_score("EURUSD", "USD");
        assert!((s - 3.0).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn unrelated_strings_score_zero() {
        assert_eq!(string_score("EURUSD", "ZZZ"), 0.0);
        assert_eq!(string_score("FOREX", "QQQQQQ"), 0.0);
    }

    #[test]
    fn short_strings_keep_a_distance_bonus() {
        // "fx" -> "zzz" is 3 edits, so the distance term alone is 1.5.
        assert!((string_score("FX", "ZZZ") - 1.5).abs() < 1e-9);
    }

    #[test]
    fn empty_needle_scores_zero() {
        assert_eq!(string_score("EURUSD", ""), 0.0);
    }

    #[test]
    fn identical_beats_unrelated() {
        for h in ["BTCUSDT", "EURUSD", "CAC40", "X"] {
            let same = string_score(h, h);
            for n in ["qqqq", "ZZZ", "lorem-ipsum"] {
                assert!(same > string_score(h, n), "{h} vs {n}");
            }
        }
    }

    #[test]
    fn score_is_never_negative() {
        assert!(string_score("A", "a very long unrelated query") >= 0.0);
    }
}
