//! Position-wise distance between signatures.
//!
//! One normalization is used for every comparison and every percentage shown
//! to users: `dissimilarity = distance * 100 / len`, where `len` is the
//! number of signature positions. Threshold checks are done in integer
//! arithmetic so a boundary value such as 1 of 4 positions at 25% compares
//! exactly.

use crate::error::{ImgdupError, Result};

/// Count positions at which two equal-length signatures differ.
pub fn distance(a: &str, b: &str) -> Result<u32> {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return Err(ImgdupError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    Ok(a.iter().zip(b).filter(|(x, y)| x != y).count() as u32)
}

/// Normalized dissimilarity in percent (0 = identical, 100 = every position differs).
pub fn dissimilarity_percent(a: &str, b: &str) -> Result<f64> {
    let d = distance(a, b)?;
    if a.is_empty() {
        return Ok(0.0);
    }
    Ok(f64::from(d) * 100.0 / a.len() as f64)
}

/// Similarity in percent, 100 meaning identical.
pub fn similarity_percent(a: &str, b: &str) -> Result<f64> {
    Ok(100.0 - dissimilarity_percent(a, b)?)
}

/// True when the normalized dissimilarity is at most `threshold_percent`.
///
/// Empty signatures never match anything, and signatures of different
/// lengths fail with [`ImgdupError::LengthMismatch`].
pub fn are_similar(a: &str, b: &str, threshold_percent: u32) -> Result<bool> {
    let d = distance(a, b)?;
    if a.is_empty() {
        return Ok(false);
    }
    Ok(u64::from(d) * 100 <= u64::from(threshold_percent) * a.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        assert_eq!(distance("deadbeef", "deadbeef").unwrap(), 0);
    }

    #[test]
    fn test_distance_counts_positions() {
        assert_eq!(distance("AAAA", "AAAB").unwrap(), 1);
        assert_eq!(distance("0000", "ffff").unwrap(), 4);
    }

    #[test]
    fn test_distance_length_mismatch() {
        let err = distance("abc", "abcd").unwrap_err();
        assert!(matches!(
            err,
            ImgdupError::LengthMismatch { left: 3, right: 4 }
        ));
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(are_similar("AAAA", "AAAB", 25).unwrap());
        assert!(!are_similar("AAAA", "AAAB", 10).unwrap());
        assert!(!are_similar("AAAA", "AAAB", 24).unwrap());
    }

    #[test]
    fn test_percentages_share_normalization() {
        assert_eq!(dissimilarity_percent("AAAA", "AAAB").unwrap(), 25.0);
        assert_eq!(similarity_percent("AAAA", "AAAB").unwrap(), 75.0);
        assert_eq!(similarity_percent("abcd", "abcd").unwrap(), 100.0);

        // The boolean decision agrees with the reported percentage.
        let pct = dissimilarity_percent("0123456789abcdef", "0123456789abcdff").unwrap();
        assert_eq!(are_similar("0123456789abcdef", "0123456789abcdff", 7).unwrap(), pct <= 7.0);
        assert_eq!(are_similar("0123456789abcdef", "0123456789abcdff", 6).unwrap(), pct <= 6.0);
    }

    #[test]
    fn test_empty_signatures_never_similar() {
        assert!(!are_similar("", "", 100).unwrap());
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let pairs = [("a1b2", "a1c2"), ("ffff", "0000"), ("1234", "1234")];
        for (a, b) in pairs {
            for threshold in [0, 10, 25, 50, 100] {
                assert_eq!(
                    are_similar(a, b, threshold).unwrap(),
                    are_similar(b, a, threshold).unwrap()
                );
            }
        }
    }
}
