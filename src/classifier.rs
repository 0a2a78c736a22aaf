use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    features::SparseMatrix,
    optim::Lbfgs,
};

/// Base trait for binary classifiers over sparse feature rows.
pub trait Classifier {
    fn fit(&mut self, features: &SparseMatrix, labels: &[bool]) -> Result<FitSummary>;

    /// Raw margin for every row; positive means the positive class.
    fn decision_function(&self, features: &SparseMatrix) -> Result<Vec<f64>>;

    /// Probability of the positive class for every row.
    fn predict_proba(&self, features: &SparseMatrix) -> Result<Vec<f64>> {
        Ok(self
            .decision_function(features)?
            .into_iter()
            .map(sigmoid)
            .collect())
    }

    /// Thresholds the margin rather than the probability: a margin of zero,
    /// or one small enough that its sigmoid rounds to 0.5, is negative.
    fn predict(&self, features: &SparseMatrix) -> Result<Vec<bool>> {
        Ok(self
            .decision_function(features)?
            .into_iter()
            .map(|m| m > 0.0)
            .collect())
    }
}

/// How training samples are weighted in the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassWeight {
    Uniform,
    /// `n_samples / (2 * n_samples_of_class)`
    Balanced,
}

/// Optimizer statistics from one fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    pub iterations: usize,
    pub converged: bool,
    pub loss: f64,
}

/// L2-regularised logistic regression fitted with L-BFGS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularisation strength.
    c: f64,
    max_iter: usize,
    tol: f64,
    class_weight: ClassWeight,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LogisticRegression {
    pub fn new(c: f64, max_iter: usize, class_weight: ClassWeight) -> Self {
        Self {
            c,
            max_iter,
            tol: 1e-4,
            class_weight,
            coefficients: Vec::new(),
            intercept: 0.0,
        }
    }

    #[inline]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    #[inline]
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Number of features the model was fitted on.
    #[inline]
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn sample_weights(&self, labels: &[bool]) -> Vec<f64> {
        match self.class_weight {
            ClassWeight::Uniform => vec![1.0; labels.len()],
            ClassWeight::Balanced => {
                let n = labels.len() as f64;
                let positives = labels.iter().filter(|&&y| y).count() as f64;
                let negatives = n - positives;
                let pos_weight = n / (2.0 * positives);
                let neg_weight = n / (2.0 * negatives);
                labels
                    .iter()
                    .map(|&y| if y { pos_weight } else { neg_weight })
                    .collect()
            }
        }
    }
}

impl Classifier for LogisticRegression {
    /// Minimises `0.5 * |w|^2 + C * sum_i s_i * log(1 + exp(-y_i * (w.x_i + b)))`
    /// with the intercept left unpenalised.
    fn fit(&mut self, features: &SparseMatrix, labels: &[bool]) -> Result<FitSummary> {
        if features.n_rows() != labels.len() {
            return Err(Error::LengthMismatch {
                samples: features.n_rows(),
                labels: labels.len(),
            });
        }
        if labels.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        if labels.iter().all(|&y| y == labels[0]) {
            return Err(Error::SingleClass(labels[0]));
        }

        let n_features = features.n_cols();
        let weights = self.sample_weights(labels);
        let c = self.c;

        let objective = |params: &[f64]| {
            let (w, b) = params.split_at(n_features);
            let mut loss = 0.5 * w.iter().map(|v| v * v).sum::<f64>();
            let mut grad = params.to_vec();
            grad[n_features] = 0.0;

            for ((row, &label), &weight) in features.rows().zip(labels).zip(&weights) {
                let y = if label { 1.0 } else { -1.0 };
                let m = y * margin(row, w, b[0]);
                loss += c * weight * log1p_exp(-m);
                let g = -c * weight * y * sigmoid(-m);
                for &(col, value) in row {
                    grad[col] += g * value;
                }
                grad[n_features] += g;
            }
            (loss, grad)
        };

        let solver = Lbfgs {
            max_iter: self.max_iter,
            tol: self.tol,
            ..Lbfgs::default()
        };
        let minimum = solver.minimize(objective, vec![0.0; n_features + 1]);

        if !minimum.converged {
            warn!(
                iterations = minimum.iterations,
                "logistic regression did not converge; consider raising max_iter"
            );
        }
        info!(
            features = n_features,
            iterations = minimum.iterations,
            loss = minimum.value,
            "fitted logistic regression"
        );

        let mut params = minimum.x;
        self.intercept = params.pop().unwrap_or_default();
        self.coefficients = params;

        Ok(FitSummary {
            iterations: minimum.iterations,
            converged: minimum.converged,
            loss: minimum.value,
        })
    }

    /// Raw margins `w.x + b`.
    fn decision_function(&self, features: &SparseMatrix) -> Result<Vec<f64>> {
        if features.n_cols() != self.coefficients.len() {
            return Err(Error::FeatureWidth {
                expected: self.coefficients.len(),
                actual: features.n_cols(),
            });
        }
        Ok(features
            .rows()
            .map(|row| margin(row, &self.coefficients, self.intercept))
            .collect())
    }
}

#[inline]
fn margin(row: &[(usize, f64)], w: &[f64], b: f64) -> f64 {
    row.iter().fold(b, |acc, &(col, value)| acc + w[col] * value)
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
#[inline]
fn log1p_exp(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (SparseMatrix, Vec<bool>) {
        let x = SparseMatrix::from_dense(
            2,
            &[
                vec![1.0, 0.0],
                vec![0.9, 0.1],
                vec![0.8, 0.0],
                vec![0.0, 1.0],
                vec![0.1, 0.9],
                vec![0.0, 0.8],
            ],
        )
        .unwrap();
        (x, vec![true, true, true, false, false, false])
    }

    #[test]
    fn learns_separable_data() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(10.0, 100, ClassWeight::Balanced);
        let summary = model.fit(&x, &y).unwrap();
        assert!(summary.iterations > 0);
        assert_eq!(model.predict(&x).unwrap(), y);
        assert!(model.coefficients()[0] > 0.0);
        assert!(model.coefficients()[1] < 0.0);
    }

    #[test]
    fn probabilities_are_in_unit_interval() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(1.0, 100, ClassWeight::Balanced);
        model.fit(&x, &y).unwrap();
        for p in model.predict_proba(&x).unwrap() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn balanced_weights_invert_class_frequency() {
        let model = LogisticRegression::new(1.0, 100, ClassWeight::Balanced);
        let weights = model.sample_weights(&[true, false, false, false]);
        assert_eq!(weights, vec![2.0, 2.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0]);

        let uniform = LogisticRegression::new(1.0, 100, ClassWeight::Uniform);
        assert_eq!(uniform.sample_weights(&[true, false]), vec![1.0, 1.0]);
    }

    #[test]
    fn balancing_shifts_minority_predictions() {
        // One positive among many identical-looking negatives.
        let mut rows = vec![vec![1.0, 0.2]];
        rows.extend(std::iter::repeat(vec![0.8, 0.3]).take(9));
        let x = SparseMatrix::from_dense(2, &rows).unwrap();
        let mut y = vec![false; 10];
        y[0] = true;

        let mut uniform = LogisticRegression::new(1.0, 100, ClassWeight::Uniform);
        uniform.fit(&x, &y).unwrap();
        let mut balanced = LogisticRegression::new(1.0, 100, ClassWeight::Balanced);
        balanced.fit(&x, &y).unwrap();

        let p_uniform = uniform.predict_proba(&x).unwrap()[0];
        let p_balanced = balanced.predict_proba(&x).unwrap()[0];
        assert!(p_balanced > p_uniform);
    }

    #[test]
    fn rejects_bad_training_input() {
        let (x, _) = separable();
        let mut model = LogisticRegression::new(1.0, 100, ClassWeight::Balanced);
        assert!(matches!(
            model.fit(&x, &[true; 6]),
            Err(Error::SingleClass(true))
        ));
        assert!(matches!(
            model.fit(&x, &[true, false]),
            Err(Error::LengthMismatch { samples: 6, labels: 2 })
        ));
    }

    #[test]
    fn predicting_with_wrong_width_fails() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(1.0, 100, ClassWeight::Balanced);
        model.fit(&x, &y).unwrap();
        let wide = SparseMatrix::from_dense(3, &[vec![1.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            model.predict(&wide),
            Err(Error::FeatureWidth { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn zero_and_tiny_negative_margins_predict_negative() {
        let model = LogisticRegression {
            coefficients: vec![1.0, 1.0],
            intercept: 0.0,
            ..LogisticRegression::new(1.0, 100, ClassWeight::Balanced)
        };
        let x = SparseMatrix::from_dense(
            2,
            &[vec![0.0, 0.0], vec![-1e-17, 0.0], vec![1e-17, 0.0]],
        )
        .unwrap();

        assert_eq!(model.decision_function(&x).unwrap(), vec![0.0, -1e-17, 1e-17]);
        // All three round to probability one half.
        assert_eq!(model.predict_proba(&x).unwrap(), vec![0.5, 0.5, 0.5]);
        assert_eq!(model.predict(&x).unwrap(), vec![false, false, true]);
    }

    #[test]
    fn stable_numerics() {
        assert!((log1p_exp(0.0) - 2f64.ln()).abs() < 1e-12);
        assert!((log1p_exp(800.0) - 800.0).abs() < 1e-9);
        assert_eq!(sigmoid(-800.0), 0.0);
        assert_eq!(sigmoid(800.0), 1.0);
    }
}
