//! CART classification tree: binary splits `x[f] <= t`, Gini impurity,
//! weighted samples.

use serde::{Deserialize, Serialize};

use super::{check_x, check_xy, not_fitted, sorted_classes};
use crate::error::Result;
use crate::ml::metrics::accuracy_score;
use crate::ml::Tensor;
use crate::utills::rand::XorShift64;

/// Values closer than this are treated as equal when looking for thresholds.
const FEATURE_THRESHOLD: f32 = 1e-7;

/// How many features a split looks at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    #[default]
    All,
    Sqrt,
    Log2,
    Count(usize),
}

impl MaxFeatures {
    pub fn resolve(self, n_features: usize) -> usize {
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2() as usize,
            MaxFeatures::Count(k) => k,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Clone, Debug, Serialize)]
struct Split {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
}

#[derive(Clone, Debug, Serialize)]
struct TreeNode {
    split: Option<Split>,
    /// Class proportions of the training weight that reached this node.
    value: Vec<f64>,
    impurity: f64,
    weight: f64,
}

/// Feature-major view of the training matrix plus weights and encoded labels.
struct TrainingSet<'a> {
    x: &'a [f32],
    d: usize,
    y: &'a [usize],
    weights: &'a [f64],
    n_classes: usize,
}

impl TrainingSet<'_> {
    #[inline]
    fn value(&self, sample: usize, feature: usize) -> f32 {
        self.x[sample * self.d + feature]
    }

    fn class_weights(&self, samples: &[usize]) -> Vec<f64> {
        let mut counts = vec![0.0; self.n_classes];
        for &s in samples {
            counts[self.y[s]] += self.weights[s];
        }
        counts
    }
}

fn gini(counts: &[f64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|c| (c / total).powi(2)).sum::<f64>()
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    /// Weighted child impurity, `w_l * gini_l + w_r * gini_r`.
    children_impurity: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DecisionTreeClassifier {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub seed: u64,
    classes: Vec<usize>,
    n_features: usize,
    nodes: Vec<TreeNode>,
    importances: Vec<f64>,
}

impl Default for DecisionTreeClassifier {
    fn default() -> Self {
        DecisionTreeClassifier {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            seed: 0,
            classes: Vec::new(),
            n_features: 0,
            nodes: Vec::new(),
            importances: Vec::new(),
        }
    }
}

impl DecisionTreeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&mut self, x: &Tensor, y: &[usize]) -> Result<&mut Self> {
        let (n, d) = check_xy(x, y)?;
        let classes = sorted_classes(y)?;
        let encoded: Vec<usize> = y
            .iter()
            .map(|label| classes.partition_point(|c| c < label))
            .collect();
        let weights = vec![1.0; n];
        let mut rng = XorShift64::new(self.seed);

        self.classes = classes;
        self.grow(x.as_f32_slice(), d, &encoded, &weights, &mut rng);
        Ok(self)
    }

    /// Fits on labels already encoded as `0..classes.len()`. Rows with zero
    /// weight are ignored.
    pub(crate) fn fit_encoded(
        &mut self,
        x: &[f32],
        d: usize,
        y: &[usize],
        classes: &[usize],
        weights: &[f64],
        rng: &mut XorShift64,
    ) {
        self.classes = classes.to_vec();
        self.grow(x, d, y, weights, rng);
    }

    fn grow(&mut self, x: &[f32], d: usize, y: &[usize], weights: &[f64], rng: &mut XorShift64) {
        let data = TrainingSet {
            x,
            d,
            y,
            weights,
            n_classes: self.classes.len(),
        };
        self.n_features = d;
        self.nodes.clear();
        self.importances = vec![0.0; d];

        let max_features = self.max_features.resolve(d);
        let root: Vec<usize> = (0..y.len()).filter(|&i| weights[i] > 0.0).collect();
        let mut features: Vec<usize> = (0..d).collect();

        // (node id, samples, depth)
        let mut stack = vec![(self.push_node(&data, &root), root, 0usize)];
        while let Some((id, samples, depth)) = stack.pop() {
            let node_impurity = self.nodes[id].impurity;
            let is_leaf = self.max_depth.is_some_and(|m| depth >= m)
                || samples.len() < self.min_samples_split
                || samples.len() < 2 * self.min_samples_leaf
                || node_impurity <= f64::EPSILON;
            if is_leaf {
                continue;
            }

            let Some(best) = self.best_split(&data, &samples, &mut features, max_features, rng)
            else {
                continue;
            };

            let decrease = self.nodes[id].weight * node_impurity - best.children_impurity;
            self.importances[best.feature] += decrease;

            let left = self.push_node(&data, &best.left);
            let right = self.push_node(&data, &best.right);
            self.nodes[id].split = Some(Split {
                feature: best.feature,
                threshold: best.threshold,
                left,
                right,
            });
            stack.push((right, best.right, depth + 1));
            stack.push((left, best.left, depth + 1));
        }

        let total: f64 = self.importances.iter().sum();
        if total > 0.0 {
            self.importances.iter_mut().for_each(|v| *v /= total);
        }
    }

    fn push_node(&mut self, data: &TrainingSet, samples: &[usize]) -> usize {
        let counts = data.class_weights(samples);
        let weight: f64 = counts.iter().sum();
        let impurity = gini(&counts, weight);
        let value = if weight > 0.0 {
            counts.iter().map(|c| c / weight).collect()
        } else {
            counts
        };
        self.nodes.push(TreeNode {
            split: None,
            value,
            impurity,
            weight,
        });
        self.nodes.len() - 1
    }

    /// Visits features in random order. After `max_features` features have
    /// been examined the search stops, unless no valid split was found yet.
    fn best_split(
        &self,
        data: &TrainingSet,
        samples: &[usize],
        features: &mut [usize],
        max_features: usize,
        rng: &mut XorShift64,
    ) -> Option<BestSplit> {
        rng.shuffle(features);

        let mut best: Option<(usize, f64, f64, usize)> = None;
        let mut order: Vec<usize> = samples.to_vec();

        for (visited, &feature) in features.iter().enumerate() {
            if visited >= max_features && best.is_some() {
                break;
            }

            order.sort_by(|&a, &b| data.value(a, feature).total_cmp(&data.value(b, feature)));
            let first = data.value(order[0], feature);
            let last = data.value(order[order.len() - 1], feature);
            if last <= first + FEATURE_THRESHOLD {
                continue;
            }

            let total = data.class_weights(&order);
            let total_weight: f64 = total.iter().sum();
            let mut left = vec![0.0; data.n_classes];
            let mut left_weight = 0.0;

            for pos in 0..order.len() - 1 {
                let s = order[pos];
                left[data.y[s]] += data.weights[s];
                left_weight += data.weights[s];

                let n_left = pos + 1;
                let n_right = order.len() - n_left;
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }
                let v = data.value(s, feature);
                let next = data.value(order[pos + 1], feature);
                if next <= v + FEATURE_THRESHOLD {
                    continue;
                }

                let right_weight = total_weight - left_weight;
                let right: Vec<f64> = total.iter().zip(&left).map(|(t, l)| t - l).collect();
                let impurity = left_weight * gini(&left, left_weight)
                    + right_weight * gini(&right, right_weight);

                if best.is_none_or(|(_, _, b, _)| impurity < b) {
                    let mut threshold = (v as f64 + next as f64) / 2.0;
                    if threshold >= next as f64 {
                        threshold = v as f64;
                    }
                    best = Some((feature, threshold, impurity, n_left));
                }
            }
        }

        let (feature, threshold, children_impurity, _) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| data.value(s, feature) as f64 <= threshold);
        Some(BestSplit {
            feature,
            threshold,
            children_impurity,
            left,
            right,
        })
    }

    fn leaf(&self, row: &[f32]) -> &TreeNode {
        let mut node = &self.nodes[0];
        while let Some(split) = node.split.as_ref() {
            node = if row[split.feature] as f64 <= split.threshold {
                &self.nodes[split.left]
            } else {
                &self.nodes[split.right]
            };
        }
        node
    }

    /// Class proportions of the leaf a row falls into.
    pub(crate) fn proba_row(&self, row: &[f32]) -> &[f64] {
        &self.leaf(row).value
    }

    fn check_fitted(&self, x: &Tensor) -> Result<(usize, usize)> {
        if self.nodes.is_empty() {
            return Err(not_fitted("DecisionTreeClassifier"));
        }
        check_x(x, Some(self.n_features))
    }

    /// `[n][classes]` probabilities, columns ordered like [`Self::classes`].
    pub fn predict_proba(&self, x: &Tensor) -> Result<Vec<Vec<f64>>> {
        let (n, _) = self.check_fitted(x)?;
        Ok((0..n).map(|i| self.proba_row(x.row(i)).to_vec()).collect())
    }

    pub fn predict(&self, x: &Tensor) -> Result<Vec<usize>> {
        let (n, _) = self.check_fitted(x)?;
        Ok((0..n)
            .map(|i| self.classes[argmax(self.proba_row(x.row(i)))])
            .collect())
    }

    pub fn score(&self, x: &Tensor, y: &[usize]) -> Result<f32> {
        Ok(accuracy_score(y, &self.predict(x)?))
    }

    /// Weighted impurity decrease per feature, normalised to sum to 1
    /// (all zeros for a single-leaf tree).
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.split.is_none()).count()
    }

    /// Longest root-to-leaf path, in edges.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            deepest = deepest.max(depth);
            if let Some(split) = node.split.as_ref() {
                stack.push((split.left, depth + 1));
                stack.push((split.right, depth + 1));
            }
        }
        deepest
    }
}

/// First index of the largest value.
pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}
