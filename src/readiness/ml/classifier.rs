use rand::Rng;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, Target, TreeParams};
use super::{argmax, EstimatorError};

/// Single CART classifier over encoded labels `0..n_classes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeClassifier {
    tree: DecisionTree,
    n_classes: usize,
}

impl DecisionTreeClassifier {
    /// With `balanced`, each class is weighted by `n / (n_classes * class_count)`.
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        labels: &[usize],
        n_classes: usize,
        params: &TreeParams,
        balanced: bool,
        rng: &mut R,
    ) -> Result<Self, EstimatorError> {
        if x.is_empty() {
            return Err(EstimatorError::EmptyDataset);
        }
        if let Some(&label) = labels.iter().find(|label| **label >= n_classes) {
            return Err(EstimatorError::LabelOutOfRange { label, n_classes });
        }

        let weights = if balanced {
            balanced_weights(labels, n_classes)
        } else {
            vec![1.0; labels.len()]
        };

        let tree = DecisionTree::fit(
            x,
            Target::Classification { labels, n_classes },
            &weights,
            (0..x.len()).collect(),
            params,
            rng,
        )?;

        Ok(Self { tree, n_classes })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.tree.n_features()
    }

    /// Every leaf must hold one probability per class.
    pub fn validate(&self) -> Result<(), EstimatorError> {
        self.tree.validate()?;
        if let Some(leaf) = self
            .tree
            .leaf_values()
            .find(|value| value.len() != self.n_classes)
        {
            return Err(EstimatorError::Malformed(format!(
                "leaf distribution over {} classes, expected {}",
                leaf.len(),
                self.n_classes
            )));
        }
        Ok(())
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<Vec<f64>, EstimatorError> {
        self.tree.check_row(row)?;
        let distribution = self.tree.predict_value(row);
        if distribution.iter().any(|p| !p.is_finite()) {
            return Err(EstimatorError::NonFinite);
        }
        Ok(distribution.to_vec())
    }

    pub fn predict(&self, row: &[f64]) -> Result<usize, EstimatorError> {
        Ok(argmax(&self.predict_proba(row)?))
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        self.tree.feature_importances().to_vec()
    }
}

fn balanced_weights(labels: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0usize; n_classes];
    for label in labels {
        counts[*label] += 1;
    }
    let n = labels.len() as f64;
    labels
        .iter()
        .map(|label| n / (n_classes as f64 * counts[*label] as f64))
        .collect()
}
