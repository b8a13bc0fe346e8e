use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::EstimatorError;

const MIN_GAIN: f64 = 1e-12;

/// How many candidate features each split examines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => ((n_features as f64).sqrt().floor() as usize).clamp(1, n_features),
        }
    }
}

/// Growth limits shared by every tree-based estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

/// Fitting target addressed by row index.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Regression(&'a [f64]),
    Classification { labels: &'a [usize], n_classes: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART tree; leaves hold a mean (regression) or a class distribution (classification).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_features: usize,
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Grows a tree over `samples`, which index into `x` and may repeat (bootstrap draws).
    pub fn fit<R: Rng>(
        x: &[Vec<f64>],
        target: Target<'_>,
        weights: &[f64],
        samples: Vec<usize>,
        params: &TreeParams,
        rng: &mut R,
    ) -> Result<Self, EstimatorError> {
        let n_features = x.first().map(Vec::len).ok_or(EstimatorError::EmptyDataset)?;
        if samples.is_empty() {
            return Err(EstimatorError::EmptyDataset);
        }
        let target_len = match target {
            Target::Regression(values) => values.len(),
            Target::Classification { labels, .. } => labels.len(),
        };
        if target_len != x.len() || weights.len() != x.len() {
            return Err(EstimatorError::LengthMismatch {
                rows: x.len(),
                targets: target_len.min(weights.len()),
            });
        }

        let mut builder = Builder {
            x,
            target,
            weights,
            params,
            rng,
            n_features,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        let mut samples = samples;
        builder.grow(&mut samples, 0);

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in &mut importances {
                *value /= total;
            }
        }

        Ok(Self {
            nodes: builder.nodes,
            n_features,
            importances,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Checks the structure a deserialized tree must have before it can be walked: a
    /// root, in-range split features, and child indices that only point forward.
    pub fn validate(&self) -> Result<(), EstimatorError> {
        if self.nodes.is_empty() {
            return Err(EstimatorError::Malformed("tree has no nodes".to_string()));
        }
        if self.importances.len() != self.n_features {
            return Err(EstimatorError::Malformed(format!(
                "{} importances for {} features",
                self.importances.len(),
                self.n_features
            )));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if value.is_empty() => {
                    return Err(EstimatorError::Malformed(format!("leaf {index} is empty")));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= self.n_features {
                        return Err(EstimatorError::Malformed(format!(
                            "node {index} splits on feature {feature} of {}",
                            self.n_features
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(EstimatorError::Malformed(format!(
                                "node {index} points to child {child} of {}",
                                self.nodes.len()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Leaf values of every leaf, in node order.
    pub(crate) fn leaf_values(&self) -> impl Iterator<Item = &[f64]> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Leaf { value } => Some(value.as_slice()),
            Node::Split { .. } => None,
        })
    }

    /// Index of the leaf `row` falls into. Only meaningful for a tree that passed
    /// [`DecisionTree::validate`] and a row of `n_features` values.
    pub fn apply(&self, row: &[f64]) -> usize {
        let mut current = 0;
        loop {
            match &self.nodes[current] {
                Node::Leaf { .. } => return current,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    current = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn predict_value(&self, row: &[f64]) -> &[f64] {
        match &self.nodes[self.apply(row)] {
            Node::Leaf { value } => value,
            Node::Split { .. } => &[],
        }
    }

    pub(crate) fn set_leaf_value(&mut self, leaf: usize, value: Vec<f64>) {
        if let Some(Node::Leaf { value: slot }) = self.nodes.get_mut(leaf) {
            *slot = value;
        }
    }

    pub(crate) fn check_row(&self, row: &[f64]) -> Result<(), EstimatorError> {
        if row.len() == self.n_features {
            Ok(())
        } else {
            Err(EstimatorError::FeatureCount {
                expected: self.n_features,
                actual: row.len(),
            })
        }
    }
}

#[derive(Debug, Clone)]
enum Stats {
    Regression { w: f64, wy: f64, wyy: f64 },
    Classification { w: f64, counts: Vec<f64> },
}

impl Stats {
    fn empty(target: Target<'_>) -> Self {
        match target {
            Target::Regression(_) => Stats::Regression {
                w: 0.0,
                wy: 0.0,
                wyy: 0.0,
            },
            Target::Classification { n_classes, .. } => Stats::Classification {
                w: 0.0,
                counts: vec![0.0; n_classes],
            },
        }
    }

    fn add(&mut self, target: Target<'_>, index: usize, weight: f64, sign: f64) {
        match (self, target) {
            (Stats::Regression { w, wy, wyy }, Target::Regression(values)) => {
                let y = values[index];
                *w += sign * weight;
                *wy += sign * weight * y;
                *wyy += sign * weight * y * y;
            }
            (Stats::Classification { w, counts }, Target::Classification { labels, .. }) => {
                *w += sign * weight;
                counts[labels[index]] += sign * weight;
            }
            _ => {}
        }
    }

    fn weight(&self) -> f64 {
        match self {
            Stats::Regression { w, .. } | Stats::Classification { w, .. } => *w,
        }
    }

    fn impurity(&self) -> f64 {
        match self {
            Stats::Regression { w, wy, wyy } => {
                if *w <= 0.0 {
                    return 0.0;
                }
                let mean = wy / w;
                (wyy / w - mean * mean).max(0.0)
            }
            Stats::Classification { w, counts } => {
                if *w <= 0.0 {
                    return 0.0;
                }
                1.0 - counts.iter().map(|c| (c / w) * (c / w)).sum::<f64>()
            }
        }
    }

    fn leaf_value(&self) -> Vec<f64> {
        match self {
            Stats::Regression { w, wy, .. } => {
                vec![if *w > 0.0 { wy / w } else { 0.0 }]
            }
            Stats::Classification { w, counts } => {
                if *w > 0.0 {
                    counts.iter().map(|c| c / w).collect()
                } else {
                    vec![0.0; counts.len()]
                }
            }
        }
    }

    fn difference(&self, other: &Stats) -> Stats {
        match (self, other) {
            (
                Stats::Regression { w, wy, wyy },
                Stats::Regression {
                    w: ow,
                    wy: owy,
                    wyy: owyy,
                },
            ) => Stats::Regression {
                w: w - ow,
                wy: wy - owy,
                wyy: wyy - owyy,
            },
            (Stats::Classification { w, counts }, Stats::Classification { w: ow, counts: oc }) => {
                Stats::Classification {
                    w: w - ow,
                    counts: counts.iter().zip(oc).map(|(a, b)| a - b).collect(),
                }
            }
            _ => self.clone(),
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'a, R> {
    x: &'a [Vec<f64>],
    target: Target<'a>,
    weights: &'a [f64],
    params: &'a TreeParams,
    rng: &'a mut R,
    n_features: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl<R: Rng> Builder<'_, R> {
    fn grow(&mut self, samples: &mut [usize], depth: usize) -> usize {
        let stats = self.stats(samples);
        let impurity = stats.impurity();

        let splittable = depth < self.params.max_depth
            && samples.len() >= self.params.min_samples_split
            && samples.len() >= 2 * self.params.min_samples_leaf.max(1)
            && impurity > MIN_GAIN;

        let split = if splittable {
            self.best_split(samples, &stats)
        } else {
            None
        };

        let Some(split) = split else {
            self.nodes.push(Node::Leaf {
                value: stats.leaf_value(),
            });
            return self.nodes.len() - 1;
        };

        let node = self.nodes.len();
        self.nodes.push(Node::Leaf { value: Vec::new() });
        self.importances[split.feature] += split.gain;

        let mid = partition(samples, |row| self.x[row][split.feature] <= split.threshold);
        let (left_samples, right_samples) = samples.split_at_mut(mid);
        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);

        self.nodes[node] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }

    fn stats(&self, samples: &[usize]) -> Stats {
        let mut stats = Stats::empty(self.target);
        for &row in samples {
            stats.add(self.target, row, self.weights[row], 1.0);
        }
        stats
    }

    fn best_split(&mut self, samples: &[usize], parent: &Stats) -> Option<SplitCandidate> {
        let candidates = self.params.max_features.resolve(self.n_features);
        let features = index::sample(&mut *self.rng, self.n_features, candidates).into_vec();
        let parent_cost = parent.weight() * parent.impurity();
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut best: Option<SplitCandidate> = None;
        let mut ordered = samples.to_vec();

        for feature in features {
            ordered.sort_by(|a, b| self.x[*a][feature].total_cmp(&self.x[*b][feature]));
            let mut left = Stats::empty(self.target);

            for position in 0..ordered.len() - 1 {
                let row = ordered[position];
                left.add(self.target, row, self.weights[row], 1.0);

                let here = self.x[row][feature];
                let next = self.x[ordered[position + 1]][feature];
                if here >= next {
                    continue;
                }
                let left_count = position + 1;
                if left_count < min_leaf || ordered.len() - left_count < min_leaf {
                    continue;
                }

                let right = parent.difference(&left);
                let cost = left.weight() * left.impurity() + right.weight() * right.impurity();
                let gain = parent_cost - cost;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}

/// Moves rows satisfying `goes_left` to the front; returns the boundary.
fn partition(samples: &mut [usize], goes_left: impl Fn(usize) -> bool) -> usize {
    let mut boundary = 0;
    for position in 0..samples.len() {
        if goes_left(samples[position]) {
            samples.swap(boundary, position);
            boundary += 1;
        }
    }
    boundary
}
