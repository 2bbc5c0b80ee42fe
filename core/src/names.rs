//! Name Utilities
//!
//! Normalisation helpers for pool-reported worker identifiers. Every
//! adapter funnels its raw names through these before building its
//! observation index, and the engine uses `tail`/`tail_key` to match
//! observations back to miner rows.

use unicode_normalization::UnicodeNormalization;

const ZERO_WIDTH: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Unicode NFKC-normalise, strip zero-width joiners/space, trim ASCII
/// whitespace.
pub fn clean(s: &str) -> String {
    s.nfkc()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Prefix before the first `.`; empty string if there is none.
pub fn head(s: &str) -> &str {
    match s.find('.') {
        Some(idx) => &s[..idx],
        None => "",
    }
}

/// Suffix after the last `.`; the whole string if there is none.
pub fn tail(s: &str) -> &str {
    match s.rfind('.') {
        Some(idx) => &s[idx + 1..],
        None => s,
    }
}

/// `tail`, lowercased, with leading zeros folded away. `"0"` is preserved
/// exactly so it never collapses to the empty string.
pub fn tail_key(s: &str) -> String {
    let lower = tail(s).to_lowercase();
    let trimmed = lower.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_zero_width_and_trims() {
        assert_eq!(clean(" worker\u{200B}01 "), "worker01");
    }

    #[test]
    fn head_and_tail_split_on_first_and_last_dot() {
        assert_eq!(head("acct.sub.worker01"), "acct");
        assert_eq!(tail("acct.sub.worker01"), "worker01");
        assert_eq!(head("bareword"), "");
        assert_eq!(tail("bareword"), "bareword");
    }

    #[test]
    fn tail_key_folds_leading_zeros_but_keeps_zero() {
        assert_eq!(tail_key("acct.001"), "1");
        assert_eq!(tail_key("acct.01"), "1");
        assert_eq!(tail_key("acct.1"), "1");
        assert_eq!(tail_key("acct.0"), "0");
        assert_eq!(tail_key("acct.000"), "0");
    }

    #[test]
    fn tail_is_idempotent() {
        let cases = ["a.b.c", "bareword", "a.0", ""];
        for c in cases {
            assert_eq!(tail(tail(c)), tail(c));
        }
    }
}
