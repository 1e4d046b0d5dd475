//! Fuzzy string similarity.

use similar::{ChangeTag, TextDiff};

/// Percent similarity of two strings, 0 to 100.
///
/// Both inputs are trimmed and lowercased, then scored as
/// `round(200 * lcs / (len_a + len_b))` over characters, where `lcs` is the
/// longest common subsequence. The pair is ordered before diffing so the
/// score does not depend on argument order. Two empty strings score 100.
pub fn similarity(a: &str, b: &str) -> u8 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    let total = first.chars().count() + second.chars().count();
    if total == 0 {
        return 100;
    }
    if first == second {
        return 100;
    }

    let diff = TextDiff::from_chars(first.as_str(), second.as_str());
    let common = diff
        .iter_all_changes()
        .filter(|change| change.tag() == ChangeTag::Equal)
        .map(|change| change.value().chars().count())
        .sum::<usize>();

    // Integer rounding of 200 * common / total.
    let score = (400 * common + total) / (2 * total);
    score.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_after_normalization() {
        assert_eq!(similarity("  Alice ", "alice"), 100);
        assert_eq!(similarity("", ""), 100);
    }

    #[test]
    fn scores_partial_overlap() {
        assert_eq!(similarity("Alicia", "Alice"), 73);
        assert_eq!(similarity("abc", "xyz"), 0);
        assert_eq!(similarity("", "abc"), 0);
    }

    #[test]
    fn is_symmetric() {
        let pairs = [
            ("Alicia", "Alice"),
            ("kitten", "sitting"),
            ("Main Street 12", "main st. 12"),
            ("ab", "ba"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a), "{} / {}", a, b);
        }
    }
}
