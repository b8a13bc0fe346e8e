use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, MaxFeatures, Target, TreeParams};
use super::{average_importances, EstimatorError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub tree: TreeParams,
    /// Fraction of the training rows drawn (with replacement) for each tree.
    pub max_samples: f64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams {
                max_depth: 12,
                min_samples_split: 20,
                min_samples_leaf: 10,
                max_features: MaxFeatures::Sqrt,
            },
            max_samples: 0.8,
        }
    }
}

/// Bagged regression trees; predictions are the mean over trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    trees: Vec<DecisionTree>,
    n_features: usize,
}

impl RandomForestRegressor {
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        y: &[f64],
        params: &ForestParams,
        rng: &mut R,
    ) -> Result<Self, EstimatorError> {
        let n_features = x.first().map(Vec::len).ok_or(EstimatorError::EmptyDataset)?;
        if x.len() != y.len() {
            return Err(EstimatorError::LengthMismatch {
                rows: x.len(),
                targets: y.len(),
            });
        }

        let draws = ((x.len() as f64 * params.max_samples).round() as usize).max(1);
        let weights = vec![1.0; x.len()];
        let seeds: Vec<u64> = (0..params.n_estimators.max(1)).map(|_| rng.gen()).collect();

        let trees = seeds
            .into_par_iter()
            .map(|seed| {
                let mut tree_rng = StdRng::seed_from_u64(seed);
                let samples: Vec<usize> = (0..draws)
                    .map(|_| tree_rng.gen_range(0..x.len()))
                    .collect();
                DecisionTree::fit(
                    x,
                    Target::Regression(y),
                    &weights,
                    samples,
                    &params.tree,
                    &mut tree_rng,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { trees, n_features })
    }

    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn validate(&self) -> Result<(), EstimatorError> {
        if self.trees.is_empty() {
            return Err(EstimatorError::Malformed("forest has no trees".to_string()));
        }
        for tree in &self.trees {
            if tree.n_features() != self.n_features {
                return Err(EstimatorError::Malformed(format!(
                    "tree over {} features in a forest over {}",
                    tree.n_features(),
                    self.n_features
                )));
            }
            tree.validate()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn trees_mut(&mut self) -> &mut [DecisionTree] {
        &mut self.trees
    }

    pub fn predict(&self, row: &[f64]) -> Result<f64, EstimatorError> {
        if row.len() != self.n_features {
            return Err(EstimatorError::FeatureCount {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| tree.predict_value(row).first().copied().unwrap_or_default())
            .sum();
        let mean = total / self.trees.len() as f64;
        if mean.is_finite() {
            Ok(mean)
        } else {
            Err(EstimatorError::NonFinite)
        }
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        average_importances(
            self.n_features,
            self.trees.iter().map(DecisionTree::feature_importances),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            tree: TreeParams {
                max_depth: 6,
                min_samples_split: 2,
                min_samples_leaf: 1,
                max_features: MaxFeatures::All,
            },
            max_samples: 0.8,
        }
    }

    #[test]
    fn forest_tracks_monotone_target() {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let mut rng = StdRng::seed_from_u64(42);

        let forest = RandomForestRegressor::fit(&x, &y, &small_params(), &mut rng).expect("fits");

        assert_eq!(forest.n_estimators(), 15);
        let low = forest.predict(&[5.0]).expect("predicts");
        let high = forest.predict(&[95.0]).expect("predicts");
        assert!(low < 20.0, "low prediction {low}");
        assert!(high > 80.0, "high prediction {high}");
        assert_eq!(forest.feature_importances(), vec![1.0]);
    }

    #[test]
    fn same_seed_reproduces_the_forest() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 7) as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| (i * 2) as f64).collect();

        let a = RandomForestRegressor::fit(&x, &y, &small_params(), &mut StdRng::seed_from_u64(9))
            .expect("fits");
        let b = RandomForestRegressor::fit(&x, &y, &small_params(), &mut StdRng::seed_from_u64(9))
            .expect("fits");

        assert_eq!(a, b);
    }

    #[test]
    fn rejects_wrong_width_rows() {
        let x = vec![vec![1.0, 2.0], vec![2.0, 3.0]];
        let forest = RandomForestRegressor::fit(
            &x,
            &[1.0, 2.0],
            &small_params(),
            &mut StdRng::seed_from_u64(1),
        )
        .expect("fits");
        assert_eq!(
            forest.predict(&[1.0]),
            Err(EstimatorError::FeatureCount {
                expected: 2,
                actual: 1
            })
        );
    }
}
