use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::tree::{argmax, DecisionTreeClassifier, MaxFeatures};
use super::{check_x, check_xy, not_fitted, sorted_classes};
use crate::error::Result;
use crate::ml::metrics::accuracy_score;
use crate::ml::Tensor;
use crate::utills::rand::XorShift64;

/// Bagged ensemble of randomised decision trees.
///
/// Every tree gets its own seed drawn from the forest generator before any
/// tree is grown, so the fitted forest only depends on `seed`, not on how
/// rayon schedules the trees.
#[derive(Clone, Debug, Serialize)]
pub struct RandomForestClassifier {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub seed: u64,
    trees: Vec<DecisionTreeClassifier>,
    classes: Vec<usize>,
    n_features: usize,
}

impl Default for RandomForestClassifier {
    fn default() -> Self {
        RandomForestClassifier {
            n_estimators: 100,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            seed: 0,
            trees: Vec::new(),
            classes: Vec::new(),
            n_features: 0,
        }
    }
}

impl RandomForestClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&mut self, x: &Tensor, y: &[usize]) -> Result<&mut Self> {
        let (n, d) = check_xy(x, y)?;
        if self.n_estimators == 0 {
            return Err(crate::error::StudyError::InvalidArgument(
                "a forest needs at least one tree".into(),
            ));
        }
        let classes = sorted_classes(y)?;
        let encoded: Vec<usize> = y
            .iter()
            .map(|label| classes.partition_point(|c| c < label))
            .collect();

        let mut master = XorShift64::new(self.seed);
        let seeds: Vec<u64> = (0..self.n_estimators).map(|_| master.next_u64()).collect();
        let data = x.as_f32_slice();

        let template = DecisionTreeClassifier::new()
            .with_max_depth(self.max_depth)
            .with_max_features(self.max_features);
        let bootstrap = self.bootstrap;

        self.trees = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = XorShift64::new(seed);
                let mut weights = vec![0.0; n];
                if bootstrap {
                    for _ in 0..n {
                        weights[rng.gen_range(0, n)] += 1.0;
                    }
                } else {
                    weights.iter_mut().for_each(|w| *w = 1.0);
                }

                let mut tree = template.clone().with_seed(seed);
                tree.fit_encoded(data, d, &encoded, &classes, &weights, &mut rng);
                tree
            })
            .collect();

        self.classes = classes;
        self.n_features = d;
        debug!(trees = self.trees.len(), features = d, "random forest fitted");
        Ok(self)
    }

    fn check_fitted(&self, x: &Tensor) -> Result<(usize, usize)> {
        if self.trees.is_empty() {
            return Err(not_fitted("RandomForestClassifier"));
        }
        check_x(x, Some(self.n_features))
    }

    /// Mean of the tree probabilities, `[n][classes]`.
    pub fn predict_proba(&self, x: &Tensor) -> Result<Vec<Vec<f64>>> {
        let (n, _) = self.check_fitted(x)?;
        let k = self.classes.len();
        let scale = 1.0 / self.trees.len() as f64;

        Ok((0..n)
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let mut proba = vec![0.0; k];
                for tree in &self.trees {
                    for (p, v) in proba.iter_mut().zip(tree.proba_row(row)) {
                        *p += v * scale;
                    }
                }
                proba
            })
            .collect())
    }

    pub fn predict(&self, x: &Tensor) -> Result<Vec<usize>> {
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|p| self.classes[argmax(p)])
            .collect())
    }

    pub fn score(&self, x: &Tensor, y: &[usize]) -> Result<f32> {
        Ok(accuracy_score(y, &self.predict(x)?))
    }

    /// Mean of the per-tree importances, renormalised to sum to 1. Trees that
    /// never split carry no importance and are left out.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut total = vec![0.0; self.n_features];
        let mut used = 0;
        for tree in &self.trees {
            let imp = tree.feature_importances();
            if imp.iter().sum::<f64>() <= 0.0 {
                continue;
            }
            used += 1;
            for (t, v) in total.iter_mut().zip(imp) {
                *t += v;
            }
        }
        if used == 0 {
            return total;
        }
        let sum: f64 = total.iter().sum();
        total.iter_mut().for_each(|v| *v /= sum);
        total
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn trees(&self) -> &[DecisionTreeClassifier] {
        &self.trees
    }
}

/// The `n` feature names with the smallest importance, least important first.
/// Ties keep the feature order.
pub fn least_important_features(importances: &[f64], names: &[String], n: usize) -> Vec<String> {
    let mut order: Vec<usize> = (0..importances.len().min(names.len())).collect();
    order.sort_by(|&a, &b| importances[a].total_cmp(&importances[b]));
    order.into_iter().take(n).map(|i| names[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Class decided by feature 0, features 1 and 2 are uniform noise.
    fn noisy_blobs(n_per_class: usize) -> (Tensor, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut data = Vec::new();
        let mut y = Vec::new();
        for class in 0..2 {
            for _ in 0..n_per_class {
                let informative = class as f32 * 2.0 + rng.random::<f32>();
                data.extend_from_slice(&[informative, rng.random::<f32>(), rng.random::<f32>()]);
                y.push(class);
            }
        }
        (Tensor::new(data, vec![2 * n_per_class, 3]), y)
    }

    #[test]
    fn forest_finds_the_informative_feature() {
        let (x, y) = noisy_blobs(30);
        let mut forest = RandomForestClassifier::new().with_n_estimators(40).with_seed(1);
        forest.fit(&x, &y).unwrap();

        assert_eq!(forest.trees().len(), 40);
        assert!(forest.score(&x, &y).unwrap() >= 0.95);

        let imp = forest.feature_importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1] && imp[0] > imp[2], "importances {:?}", imp);

        let proba = forest.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (p.iter().sum::<f64>() - 1.0).abs() < 1e-9));
    }

    #[test]
    fn forest_is_reproducible() {
        let (x, y) = noisy_blobs(15);
        let mut a = RandomForestClassifier::new().with_n_estimators(10).with_seed(9);
        let mut b = RandomForestClassifier::new().with_n_estimators(10).with_seed(9);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.feature_importances(), b.feature_importances());
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn least_important_is_ascending() {
        let names: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let imp = [0.4, 0.1, 0.3, 0.2];
        assert_eq!(least_important_features(&imp, &names, 2), vec!["b", "d"]);
        assert_eq!(least_important_features(&imp, &names, 10).len(), 4);
    }
}
