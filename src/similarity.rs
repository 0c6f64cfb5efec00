//! Name similarity scoring.
//!
//! Names are normalized (lowercased, trimmed, whitespace runs collapsed) and
//! compared by Levenshtein edit distance over Unicode scalar values:
//!
//! ```text
//! sim(a, b) = 1 - lev(a, b) / max(len(a), len(b))
//! ```
//!
//! The score is symmetric, lies in `[0.0, 1.0]`, and is `1.0` for any name
//! compared with itself. A blank name scores `0.0` against anything else.
//!
//! Detection scores [`match_key`]s rather than raw names: the match key is
//! the normalized name with trailing business-form words ("co", "llc", ...)
//! removed, so "Elegant Events" and "Elegant Events Co" compare as equal.

use strsim::levenshtein;

/// Trailing words that name a business form rather than the business.
const BUSINESS_SUFFIXES: &[&str] = &[
    "co",
    "co.",
    "company",
    "corp",
    "corp.",
    "corporation",
    "inc",
    "inc.",
    "incorporated",
    "llc",
    "llc.",
    "ltd",
    "ltd.",
    "limited",
    "pllc",
];

/// Normalizes a name for comparison and indexing.
///
/// # Examples
///
/// ```
/// use dedupkit::similarity::normalize_name;
///
/// assert_eq!(normalize_name("  Smith   Family "), "smith family");
/// ```
#[must_use]
pub fn normalize_name(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized name with trailing business-form words removed.
///
/// At least one word is always kept, so a vendor literally named "Company"
/// still has a key.
///
/// # Examples
///
/// ```
/// use dedupkit::similarity::match_key;
///
/// assert_eq!(match_key("Elegant Events Co."), "elegant events");
/// assert_eq!(match_key("Bloom, LLC"), "bloom");
/// assert_eq!(match_key("Company"), "company");
/// ```
#[must_use]
pub fn match_key(s: &str) -> String {
    let normalized = normalize_name(s);
    let mut words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    while words.len() > 1 {
        let last = words[words.len() - 1];
        if BUSINESS_SUFFIXES.contains(&last) {
            words.pop();
        } else {
            break;
        }
    }

    let mut key = words.join(" ");
    // "Bloom, LLC" leaves a dangling comma once the suffix is gone.
    while key.ends_with(',') || key.ends_with('&') {
        key.pop();
        key.truncate(key.trim_end().len());
    }
    if key.is_empty() {
        normalized
    } else {
        key
    }
}

/// Similarity of two names in `[0.0, 1.0]`.
///
/// # Examples
///
/// ```
/// use dedupkit::similarity::similarity;
///
/// assert_eq!(similarity("Smith Family", "smith   family"), 1.0);
/// assert_eq!(similarity("", "anything"), 0.0);
/// ```
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    similarity_normalized(&normalize_name(a), &normalize_name(b))
}

/// Similarity of two already-normalized names.
///
/// Detection normalizes each name once and calls this for every pair.
#[must_use]
pub fn similarity_normalized(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    let distance = levenshtein(a, b);

    #[allow(clippy::cast_precision_loss)]
    let score = 1.0 - distance as f64 / max_len as f64;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_score_one() {
        for name in ["Elegant Events", "Ann", "Zoë Ålund", "李小龍"] {
            assert_eq!(similarity(name, name), 1.0);
        }
    }

    #[test]
    fn empty_scores_zero() {
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("anything", ""), 0.0);
        assert_eq!(similarity("   ", "anything"), 0.0);
    }

    #[test]
    fn equal_empty_names_score_one() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("  ", "\t"), 1.0);
    }

    #[test]
    fn case_and_whitespace_are_normalized() {
        assert_eq!(similarity("Smith Family", "smith   family"), 1.0);
        assert_eq!(similarity("\tSmith\nFamily ", "SMITH FAMILY"), 1.0);
    }

    #[test]
    fn symmetric() {
        let pairs = [
            ("Elegant Events", "Elegant Events Co"),
            ("Jon", "John"),
            ("kitten", "sitting"),
            ("Ålesund Florist", "Alesund Florist"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a));
        }
    }

    #[test]
    fn edit_distance_formula() {
        // kitten -> sitting: distance 3, max len 7
        let expected = 1.0 - 3.0 / 7.0;
        assert!((similarity("kitten", "sitting") - expected).abs() < 1e-12);

        // "elegant events" (14) vs "elegant events co" (17): distance 3
        let expected = 1.0 - 3.0 / 17.0;
        assert!((similarity("Elegant Events", "Elegant Events Co") - expected).abs() < 1e-12);
    }

    #[test]
    fn counts_unicode_scalars_not_bytes() {
        // One substitution over four characters.
        assert!((similarity("Zoë!", "Zoe!") - 0.75).abs() < 1e-12);
    }

    #[test]
    fn match_key_strips_business_suffixes() {
        assert_eq!(match_key("Elegant Events Co"), "elegant events");
        assert_eq!(match_key("ELEGANT  events"), "elegant events");
        assert_eq!(match_key("Acme Catering Company LLC"), "acme catering");
        assert_eq!(match_key("Bloom, LLC"), "bloom");
        assert_eq!(match_key("Co"), "co");
        assert_eq!(match_key(""), "");
    }

    #[test]
    fn match_key_leaves_person_names_alone() {
        assert_eq!(match_key("Ann Co Smith"), "ann co smith");
        assert_eq!(match_key("Smith Family"), "smith family");
    }

    #[test]
    fn score_stays_in_range() {
        let s = similarity("abc", "xyz123456");
        assert!((0.0..=1.0).contains(&s));
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }
}
