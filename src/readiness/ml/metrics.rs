use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision_macro: f64,
    pub recall_macro: f64,
    pub f1_macro: f64,
    pub precision_micro: f64,
    pub recall_micro: f64,
    pub f1_micro: f64,
    pub precision_weighted: f64,
    pub recall_weighted: f64,
    pub f1_weighted: f64,
    pub per_class: Vec<ClassMetrics>,
    /// Rows are true classes, columns predicted classes, both in `classes` order.
    pub confusion_matrix: Vec<Vec<usize>>,
    pub classes: Vec<String>,
}

impl ClassificationMetrics {
    /// Scores predictions over encoded labels; undefined ratios count as zero.
    pub fn compute(truth: &[usize], predicted: &[usize], classes: &[String]) -> Self {
        let k = classes.len();
        let mut confusion = vec![vec![0usize; k]; k];
        for (t, p) in truth.iter().zip(predicted) {
            if *t < k && *p < k {
                confusion[*t][*p] += 1;
            }
        }

        let total: usize = confusion.iter().flatten().sum();
        let correct: usize = (0..k).map(|c| confusion[c][c]).sum();

        let mut per_class = Vec::with_capacity(k);
        for (c, class) in classes.iter().enumerate() {
            let tp = confusion[c][c];
            let predicted_c: usize = (0..k).map(|row| confusion[row][c]).sum();
            let support: usize = confusion[c].iter().sum();
            let precision = ratio(tp, predicted_c);
            let recall = ratio(tp, support);
            per_class.push(ClassMetrics {
                class: class.clone(),
                precision,
                recall,
                f1: harmonic(precision, recall),
                support,
            });
        }

        let macro_avg = |pick: fn(&ClassMetrics) -> f64| {
            if k == 0 {
                0.0
            } else {
                per_class.iter().map(pick).sum::<f64>() / k as f64
            }
        };
        let weighted_avg = |pick: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                per_class
                    .iter()
                    .map(|m| pick(m) * m.support as f64)
                    .sum::<f64>()
                    / total as f64
            }
        };

        // single-label multiclass: micro precision == micro recall == accuracy
        let accuracy = ratio(correct, total);

        Self {
            accuracy,
            precision_macro: macro_avg(|m| m.precision),
            recall_macro: macro_avg(|m| m.recall),
            f1_macro: macro_avg(|m| m.f1),
            precision_micro: accuracy,
            recall_micro: accuracy,
            f1_micro: accuracy,
            precision_weighted: weighted_avg(|m| m.precision),
            recall_weighted: weighted_avg(|m| m.recall),
            f1_weighted: weighted_avg(|m| m.f1),
            per_class,
            confusion_matrix: confusion,
            classes: classes.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// Percentage error over rows with a non-zero target; zero when none exist.
    pub mape: f64,
    pub mean_error: f64,
    pub median_absolute_error: f64,
}

impl RegressionMetrics {
    pub fn compute(truth: &[f64], predicted: &[f64]) -> Self {
        let n = truth.len().min(predicted.len());
        if n == 0 {
            return Self {
                mse: 0.0,
                rmse: 0.0,
                mae: 0.0,
                r2: 0.0,
                mape: 0.0,
                mean_error: 0.0,
                median_absolute_error: 0.0,
            };
        }
        let pairs = || truth.iter().zip(predicted).take(n);

        let errors: Vec<f64> = pairs().map(|(t, p)| p - t).collect();
        let mse = errors.iter().map(|e| e * e).sum::<f64>() / n as f64;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n as f64;
        let mean_error = errors.iter().sum::<f64>() / n as f64;

        let mean_truth = truth.iter().take(n).sum::<f64>() / n as f64;
        let total_ss: f64 = truth.iter().take(n).map(|t| (t - mean_truth).powi(2)).sum();
        let residual_ss = mse * n as f64;
        let r2 = if total_ss > 0.0 {
            1.0 - residual_ss / total_ss
        } else if residual_ss == 0.0 {
            1.0
        } else {
            0.0
        };

        let percentages: Vec<f64> = pairs()
            .filter(|(t, _)| **t != 0.0)
            .map(|(t, p)| ((t - p) / t).abs() * 100.0)
            .collect();
        let mape = if percentages.is_empty() {
            0.0
        } else {
            percentages.iter().sum::<f64>() / percentages.len() as f64
        };

        let mut absolute: Vec<f64> = errors.iter().map(|e| e.abs()).collect();
        absolute.sort_by(f64::total_cmp);
        let median_absolute_error = if n % 2 == 1 {
            absolute[n / 2]
        } else {
            (absolute[n / 2 - 1] + absolute[n / 2]) / 2.0
        };

        Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2,
            mape,
            mean_error,
            median_absolute_error,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> Vec<String> {
        vec!["A".into(), "B".into()]
    }

    #[test]
    fn confusion_matrix_rows_are_truth() {
        let metrics = ClassificationMetrics::compute(&[0, 0, 1, 1], &[0, 1, 1, 1], &classes());
        assert_eq!(metrics.confusion_matrix, vec![vec![1, 1], vec![0, 2]]);
        assert_eq!(metrics.accuracy, 0.75);
        assert_eq!(metrics.per_class[0].precision, 1.0);
        assert_eq!(metrics.per_class[0].recall, 0.5);
        assert_eq!(metrics.per_class[1].support, 2);
    }

    #[test]
    fn unpredicted_class_has_zero_precision() {
        let metrics = ClassificationMetrics::compute(&[0, 1], &[0, 0], &classes());
        assert_eq!(metrics.per_class[1].precision, 0.0);
        assert_eq!(metrics.per_class[1].f1, 0.0);
    }

    #[test]
    fn regression_metrics_on_known_errors() {
        let metrics = RegressionMetrics::compute(&[10.0, 20.0, 30.0, 40.0], &[12.0, 18.0, 30.0, 44.0]);
        assert_eq!(metrics.mae, 2.0);
        assert_eq!(metrics.mse, 6.0);
        assert_eq!(metrics.mean_error, 1.0);
        assert_eq!(metrics.median_absolute_error, 2.0);
        assert!((metrics.r2 - (1.0 - 24.0 / 500.0)).abs() < 1e-12);
    }

    #[test]
    fn mape_ignores_zero_targets() {
        let metrics = RegressionMetrics::compute(&[0.0, 50.0], &[5.0, 55.0]);
        assert!((metrics.mape - 10.0).abs() < 1e-12);
    }
}
