/// What ROC-AUC is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AucInput {
    /// Positive-class probabilities.
    #[default]
    Probabilities,
    /// Thresholded 0/1 predictions.
    HardLabels,
}

/// Counts of a binary classifier's outcomes, positive class = `true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    pub fn accuracy(&self) -> f64 {
        let total_correct = self.true_positives + self.true_negatives;
        ratio(total_correct, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Harmonic mean of precision and recall; 0.0 when both are zero.
    pub fn f1(&self) -> f64 {
        let (precision, recall) = (self.precision(), self.recall());
        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        }
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Compute the confusion matrix from a list of predicted and target labels.
pub fn confusion_matrix(predicted: &[bool], real: &[bool]) -> ConfusionMatrix {
    assert_eq!(
        predicted.len(),
        real.len(),
        "Lengths of predicted and real labels must match"
    );

    let mut matrix = ConfusionMatrix::default();
    for (&p, &r) in predicted.iter().zip(real.iter()) {
        match (p, r) {
            (true, true) => matrix.true_positives += 1,
            (true, false) => matrix.false_positives += 1,
            (false, false) => matrix.true_negatives += 1,
            (false, true) => matrix.false_negatives += 1,
        }
    }
    matrix
}

/// F1 score of the positive class.
pub fn f1_score(real: &[bool], predicted: &[bool]) -> f64 {
    confusion_matrix(predicted, real).f1()
}

/// Area under the ROC curve via the rank-sum statistic, with tied scores
/// sharing their average rank. `None` when `real` holds a single class.
pub fn roc_auc(real: &[bool], scores: &[f64]) -> Option<f64> {
    assert_eq!(
        real.len(),
        scores.len(),
        "Lengths of scores and real labels must match"
    );

    let positives = real.iter().filter(|&&r| r).count();
    let negatives = real.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; the tie group spans ranks start+1 ..= end.
        let average_rank = (start + end + 1) as f64 / 2.0;
        positive_rank_sum += average_rank * order[start..end].iter().filter(|&&i| real[i]).count() as f64;
        start = end;
    }

    let (p, n) = (positives as f64, negatives as f64);
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confusion_counts_and_rates() {
        let predicted = [true, true, false, false, true];
        let real = [true, false, false, true, true];
        let matrix = confusion_matrix(&predicted, &real);
        assert_eq!(
            matrix,
            ConfusionMatrix {
                true_positives: 2,
                false_positives: 1,
                true_negatives: 1,
                false_negatives: 1,
            }
        );
        assert!((matrix.accuracy() - 0.6).abs() < 1e-12);
        assert!((matrix.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((matrix.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((matrix.f1() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn f1_of_perfect_predictions_is_one() {
        let labels = [true, false, true, false];
        assert_eq!(f1_score(&labels, &labels), 1.0);
    }

    #[test]
    fn f1_of_disjoint_predictions_is_zero() {
        assert_eq!(f1_score(&[true, false, true], &[false, true, false]), 0.0);
        assert_eq!(f1_score(&[false, false], &[false, false]), 0.0);
    }

    #[test]
    fn auc_of_perfect_and_inverted_rankings() {
        let real = [false, false, true, true];
        assert_eq!(roc_auc(&real, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&real, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
    }

    #[test]
    fn auc_counts_ties_as_half() {
        let real = [false, true];
        assert_eq!(roc_auc(&real, &[0.5, 0.5]), Some(0.5));

        // Hard labels: one positive found, one missed, no false positives.
        let real = [true, true, false, false];
        let hard = [1.0, 0.0, 0.0, 0.0];
        assert_eq!(roc_auc(&real, &hard), Some(0.75));
    }

    #[test]
    fn auc_is_undefined_for_one_class() {
        assert_eq!(roc_auc(&[true, true], &[0.1, 0.9]), None);
    }
}
