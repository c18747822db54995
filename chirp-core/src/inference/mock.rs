//! Deterministic fallback used whenever no real model is available.

/// Raw mock scores in label order (`Other`, target species).
pub const MOCK_SCORES: [f32; 2] = [0.6, 0.4];

/// Scores `MOCK_SCORES` padded with zeros to `num_classes`, normalized to
/// sum to 1.
pub fn mock_distribution(num_classes: usize) -> Vec<f32> {
    let mut scores: Vec<f32> = MOCK_SCORES.iter().copied().take(num_classes).collect();
    scores.resize(num_classes, 0.0);
    let total: f32 = scores.iter().sum();
    if total > 0.0 {
        scores.iter_mut().for_each(|s| *s /= total);
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn two_classes_keep_ratio() {
        let scores = mock_distribution(2);
        assert_relative_eq!(scores[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(scores[1], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn other_class_counts_still_sum_to_one() {
        let three = mock_distribution(3);
        assert_eq!(three.len(), 3);
        assert_relative_eq!(three.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert_eq!(three[2], 0.0);

        let one = mock_distribution(1);
        assert_relative_eq!(one[0], 1.0, epsilon = 1e-6);
        assert!(mock_distribution(0).is_empty());
    }
}
