use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, MaxFeatures, Target, TreeParams};
use super::{argmax, average_importances, EstimatorError};

const MIN_PRIOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
    /// Fraction of rows (without replacement) each stage is fitted on.
    pub subsample: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            tree: TreeParams {
                max_depth: 5,
                min_samples_split: 20,
                min_samples_leaf: 10,
                max_features: MaxFeatures::Sqrt,
            },
            subsample: 0.8,
        }
    }
}

/// Multinomial-deviance gradient boosting with one regression tree per class per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    init: Vec<f64>,
    stages: Vec<Vec<DecisionTree>>,
    learning_rate: f64,
    n_classes: usize,
    n_features: usize,
}

impl GradientBoostingClassifier {
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        params: &BoostingParams,
        rng: &mut R,
    ) -> Result<Self, EstimatorError> {
        let n_features = x.first().map(Vec::len).ok_or(EstimatorError::EmptyDataset)?;
        if x.len() != labels.len() {
            return Err(EstimatorError::LengthMismatch {
                rows: x.len(),
                targets: labels.len(),
            });
        }
        if n_classes < 2 {
            return Err(EstimatorError::TooFewClasses(n_classes));
        }
        if let Some(&label) = labels.iter().find(|label| **label >= n_classes) {
            return Err(EstimatorError::LabelOutOfRange { label, n_classes });
        }

        let n = x.len();
        let mut counts = vec![0.0; n_classes];
        for label in labels {
            counts[*label] += 1.0;
        }
        let init: Vec<f64> = counts
            .iter()
            .map(|count| (count / n as f64).max(MIN_PRIOR).ln())
            .collect();

        let mut raw: Vec<Vec<f64>> = vec![init.clone(); n];
        let weights = vec![1.0; n];
        let draws = ((n as f64 * params.subsample).round() as usize).clamp(1, n);
        let shrink = (n_classes as f64 - 1.0) / n_classes as f64;
        let mut stages = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let probabilities: Vec<Vec<f64>> = raw.iter().map(|scores| softmax(scores)).collect();
            let samples = index::sample(rng, n, draws).into_vec();
            let mut stage = Vec::with_capacity(n_classes);

            for class in 0..n_classes {
                let residuals: Vec<f64> = (0..n)
                    .map(|row| indicator(labels[row] == class) - probabilities[row][class])
                    .collect();

                let mut tree = DecisionTree::fit(
                    x,
                    Target::Regression(&residuals),
                    &weights,
                    samples.clone(),
                    &params.tree,
                    rng,
                )?;

                // Newton step per leaf over the rows that built it
                let mut numerator = vec![0.0; tree.node_count()];
                let mut denominator = vec![0.0; tree.node_count()];
                for &row in &samples {
                    let leaf = tree.apply(&x[row]);
                    let r = residuals[row];
                    numerator[leaf] += r;
                    denominator[leaf] += r.abs() * (1.0 - r.abs());
                }
                for leaf in 0..tree.node_count() {
                    let step = if denominator[leaf].abs() < 1e-150 {
                        0.0
                    } else {
                        shrink * numerator[leaf] / denominator[leaf]
                    };
                    tree.set_leaf_value(leaf, vec![step]);
                }

                for (row, scores) in raw.iter_mut().enumerate() {
                    scores[class] += params.learning_rate * leaf_output(&tree, &x[row]);
                }
                stage.push(tree);
            }
            stages.push(stage);
        }

        Ok(Self {
            init,
            stages,
            learning_rate: params.learning_rate,
            n_classes,
            n_features,
        })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    /// Each stage must carry one tree per class, matching the prior scores.
    pub fn validate(&self) -> Result<(), EstimatorError> {
        if self.n_classes < 2 {
            return Err(EstimatorError::TooFewClasses(self.n_classes));
        }
        if self.init.len() != self.n_classes {
            return Err(EstimatorError::Malformed(format!(
                "{} prior scores for {} classes",
                self.init.len(),
                self.n_classes
            )));
        }
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.len() != self.n_classes {
                return Err(EstimatorError::Malformed(format!(
                    "stage {index} has {} trees for {} classes",
                    stage.len(),
                    self.n_classes
                )));
            }
            for tree in stage {
                if tree.n_features() != self.n_features {
                    return Err(EstimatorError::Malformed(format!(
                        "stage {index} tree over {} features, expected {}",
                        tree.n_features(),
                        self.n_features
                    )));
                }
                tree.validate()?;
            }
        }
        Ok(())
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<Vec<f64>, EstimatorError> {
        if row.len() != self.n_features {
            return Err(EstimatorError::FeatureCount {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let mut scores = self.init.clone();
        for stage in &self.stages {
            for (class, tree) in stage.iter().enumerate() {
                scores[class] += self.learning_rate * leaf_output(tree, row);
            }
        }
        let probabilities = softmax(&scores);
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(EstimatorError::NonFinite);
        }
        Ok(probabilities)
    }

    pub fn predict(&self, row: &[f64]) -> Result<usize, EstimatorError> {
        Ok(argmax(&self.predict_proba(row)?))
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        average_importances(
            self.n_features,
            self.stages
                .iter()
                .flatten()
                .map(DecisionTree::feature_importances),
        )
    }
}

fn leaf_output(tree: &DecisionTree, row: &[f64]) -> f64 {
    tree.predict_value(row).first().copied().unwrap_or_default()
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|score| (score - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|value| value / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_params() -> BoostingParams {
        BoostingParams {
            n_estimators: 30,
            learning_rate: 0.3,
            tree: TreeParams {
                max_depth: 3,
                min_samples_split: 2,
                min_samples_leaf: 1,
                max_features: MaxFeatures::All,
            },
            subsample: 0.8,
        }
    }

    #[test]
    fn softmax_is_a_distribution() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn learns_three_bands() {
        let x: Vec<Vec<f64>> = (0..90).map(|i| vec![i as f64]).collect();
        let labels: Vec<usize> = (0..90).map(|i| i / 30).collect();
        let mut rng = StdRng::seed_from_u64(5);

        let model =
            GradientBoostingClassifier::fit(&x, &labels, 3, &small_params(), &mut rng).expect("fits");

        assert_eq!(model.n_stages(), 30);
        assert_eq!(model.predict(&[10.0]), Ok(0));
        assert_eq!(model.predict(&[45.0]), Ok(1));
        assert_eq!(model.predict(&[80.0]), Ok(2));
        let proba = model.predict_proba(&[80.0]).expect("proba");
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn validation_checks_stage_width() {
        let x: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64]).collect();
        let labels: Vec<usize> = (0..60).map(|i| i / 20).collect();
        let mut model = GradientBoostingClassifier::fit(
            &x,
            &labels,
            3,
            &small_params(),
            &mut StdRng::seed_from_u64(2),
        )
        .expect("fits");
        assert_eq!(model.validate(), Ok(()));

        let extra = model.stages[0][0].clone();
        model.stages[0].push(extra);
        assert!(matches!(
            model.validate(),
            Err(EstimatorError::Malformed(_))
        ));

        model.stages[0].truncate(3);
        model.init.push(0.0);
        assert!(matches!(
            model.validate(),
            Err(EstimatorError::Malformed(_))
        ));
    }

    #[test]
    fn single_class_is_rejected() {
        let result = GradientBoostingClassifier::fit(
            &[vec![0.0]],
            &[0],
            1,
            &small_params(),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(result, Err(EstimatorError::TooFewClasses(1)));
    }
}
