//! Greedy single-pass similarity clustering.

use super::distance::are_similar;

/// Anything that carries a signature can be grouped.
pub trait Signed {
    fn signature(&self) -> &str;
}

impl Signed for String {
    fn signature(&self) -> &str {
        self
    }
}

impl Signed for str {
    fn signature(&self) -> &str {
        self
    }
}

impl<T: Signed + ?Sized> Signed for &T {
    fn signature(&self) -> &str {
        (**self).signature()
    }
}

/// Group items whose signatures are within `threshold_percent` of a seed.
///
/// Items are visited in slice order. The first unassigned item seeds a new
/// group and every later unassigned item similar to that seed joins it. There
/// is no backtracking and no transitive closure: membership is decided only by
/// the pairwise test against the seed. Pairs of differing signature length are
/// treated as dissimilar. Groups with a single member are dropped, so no item
/// appears in more than one group and every group has at least two members.
pub fn group_by_similarity<T: Signed>(items: &[T], threshold_percent: u32) -> Vec<Vec<&T>> {
    let mut assigned = vec![false; items.len()];
    let mut groups = Vec::new();

    for (i, seed) in items.iter().enumerate() {
        if assigned[i] || seed.signature().is_empty() {
            continue;
        }
        assigned[i] = true;

        let mut members = vec![seed];
        for (j, candidate) in items.iter().enumerate().skip(i + 1) {
            if assigned[j] {
                continue;
            }
            if are_similar(seed.signature(), candidate.signature(), threshold_percent)
                .unwrap_or(false)
            {
                assigned[j] = true;
                members.push(candidate);
            }
        }

        if members.len() >= 2 {
            groups.push(members);
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_signatures_group() {
        let sigs = ["aaaa", "bbbb", "aaaa"];
        let groups = group_by_similarity(&sigs, 0);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], vec![&"aaaa", &"aaaa"]);
    }

    #[test]
    fn test_singletons_are_dropped() {
        let sigs = ["aaaa", "bbbb", "cccc"];
        assert!(group_by_similarity(&sigs, 0).is_empty());
    }

    #[test]
    fn test_greedy_seed_only_membership() {
        // a~b (1 of 4) and b~c (1 of 4) but a vs c differ in 2 of 4.
        let sigs = ["aaaa", "aaab", "aabb"];
        let groups = group_by_similarity(&sigs, 25);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], vec![&"aaaa", &"aaab"]);
    }

    #[test]
    fn test_order_dependence() {
        // Seeded by the middle signature, all three join.
        let sigs = ["aaab", "aaaa", "aabb"];
        let groups = group_by_similarity(&sigs, 25);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn test_length_mismatch_is_not_similar() {
        let sigs = ["aaaa", "aaaaaaaa", "aaaa"];
        let groups = group_by_similarity(&sigs, 100);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_partition_validity() {
        let sigs: Vec<String> = (0..40u32)
            .map(|i| format!("{:04x}", (i % 7) * 0x1111 + (i % 3)))
            .collect();
        let groups = group_by_similarity(&sigs, 25);

        let mut seen = std::collections::HashSet::new();
        for group in &groups {
            assert!(group.len() >= 2);
            for member in group {
                let ptr = *member as *const String;
                assert!(seen.insert(ptr), "member assigned twice");
            }
        }
    }
}
