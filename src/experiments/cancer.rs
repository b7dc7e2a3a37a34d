//! Tree classifiers on the breast cancer set, with feature importances.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::classic::forest::{least_important_features, RandomForestClassifier};
use crate::classic::tree::DecisionTreeClassifier;
use crate::config::{CancerConfig, CancerModel};
use crate::dataset::tabular::{load_breast_cancer, Tabular};
use crate::error::Result;
use crate::plot::plot_feature_importances;
use crate::preprocess::train_test_split;

#[derive(Clone, Debug, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CancerReport {
    pub model: CancerModel,
    pub train_samples: usize,
    pub test_samples: usize,
    pub accuracy: f32,
    pub importances: Vec<FeatureImportance>,
    pub least_important: Vec<String>,
    pub plot: Option<PathBuf>,
}

impl fmt::Display for CancerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<f64> = self.importances.iter().map(|i| i.importance).collect();
        writeln!(f, "{:?}", values)?;
        writeln!(f, "acc : {}", self.accuracy)?;
        write!(f, "least important : {:?}", self.least_important)?;
        if let Some(plot) = self.plot.as_ref() {
            write!(f, "\nplot : {}", plot.display())?;
        }
        Ok(())
    }
}

/// Splits `data`, keeps the configured columns and fits the configured model.
pub fn run_on(data: &Tabular, cfg: &CancerConfig) -> Result<CancerReport> {
    let (train_rows, test_rows) = train_test_split(data.n_samples(), cfg.train_size, cfg.split_seed)?;
    let train = data.take_rows(&train_rows).select_columns(&cfg.columns)?;
    let test = data.take_rows(&test_rows).select_columns(&cfg.columns)?;
    let (y_train, y_test) = (train.labels(), test.labels());

    let (accuracy, importances) = match cfg.model {
        CancerModel::Forest => {
            let mut forest = RandomForestClassifier::new()
                .with_n_estimators(cfg.n_estimators)
                .with_max_features(cfg.max_features)
                .with_max_depth(cfg.max_depth)
                .with_seed(cfg.seed);
            forest.fit(&train.x, &y_train)?;
            (forest.score(&test.x, &y_test)?, forest.feature_importances())
        }
        CancerModel::Tree => {
            let mut tree = DecisionTreeClassifier::new()
                .with_max_features(cfg.max_features)
                .with_max_depth(cfg.max_depth)
                .with_seed(cfg.seed);
            tree.fit(&train.x, &y_train)?;
            (tree.score(&test.x, &y_test)?, tree.feature_importances().to_vec())
        }
    };
    info!(model = ?cfg.model, accuracy, "breast cancer classifier fitted");

    if let Some(path) = cfg.plot_path.as_ref() {
        plot_feature_importances(path, &train.feature_names, &importances)?;
        info!(path = %path.display(), "wrote feature importance plot");
    }

    let least_important = least_important_features(&importances, &train.feature_names, cfg.least_important);
    Ok(CancerReport {
        model: cfg.model,
        train_samples: train.n_samples(),
        test_samples: test.n_samples(),
        accuracy,
        importances: train
            .feature_names
            .iter()
            .zip(&importances)
            .map(|(name, &importance)| FeatureImportance {
                feature: name.clone(),
                importance,
            })
            .collect(),
        least_important,
        plot: cfg.plot_path.clone(),
    })
}

pub fn run(cfg: &CancerConfig) -> Result<CancerReport> {
    let data = load_breast_cancer(&cfg.data_path)?;
    info!(samples = data.n_samples(), path = %cfg.data_path.display(), "loaded breast cancer");
    run_on(&data, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tabular::BREAST_CANCER_FEATURES;
    use crate::ml::Tensor;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Column 2 (mean perimeter) decides the class, the rest is noise.
    fn synthetic(n: usize) -> Tabular {
        let mut rng = StdRng::seed_from_u64(21);
        let mut x = Vec::with_capacity(n * 30);
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let class = i % 2;
            for c in 0..30 {
                let v = if c == 2 {
                    class as f32 * 10.0 + rng.random::<f32>()
                } else {
                    rng.random::<f32>() * 10.0
                };
                x.push(v);
            }
            y.push(class as f32);
        }
        Tabular::new(
            Tensor::new(x, vec![n, 30]),
            y,
            BREAST_CANCER_FEATURES.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn forest_ranks_the_informative_column_first() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CancerConfig {
            n_estimators: 20,
            plot_path: Some(dir.path().join("importances.svg")),
            ..CancerConfig::default()
        };
        let report = run_on(&synthetic(60), &cfg).unwrap();

        assert_eq!((report.train_samples, report.test_samples), (48, 12));
        assert!(report.accuracy >= 0.75, "accuracy {}", report.accuracy);
        let names: Vec<&str> = report.importances.iter().map(|i| i.feature.as_str()).collect();
        assert_eq!(names, vec!["mean radius", "mean perimeter", "mean area"]);
        let imp: Vec<f64> = report.importances.iter().map(|i| i.importance).collect();
        assert!(imp[1] > imp[0] && imp[1] > imp[2], "importances {:?}", imp);
        assert_eq!(report.least_important.len(), 1);
        assert_ne!(report.least_important[0], "mean perimeter");

        let svg = std::fs::read_to_string(dir.path().join("importances.svg")).unwrap();
        assert!(svg.contains("mean perimeter"));
    }

    #[test]
    fn single_tree_variant() {
        let cfg = CancerConfig {
            model: CancerModel::Tree,
            max_features: crate::classic::tree::MaxFeatures::All,
            plot_path: None,
            ..CancerConfig::default()
        };
        let report = run_on(&synthetic(40), &cfg).unwrap();
        assert_eq!(report.model, CancerModel::Tree);
        assert_eq!(report.accuracy, 1.0);
        let total: f64 = report.importances.iter().map(|i| i.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(!report.to_string().contains("plot"));
    }

    #[test]
    fn bad_column_is_an_error() {
        let cfg = CancerConfig {
            columns: vec![0, 31],
            plot_path: None,
            ..CancerConfig::default()
        };
        assert!(run_on(&synthetic(20), &cfg).is_err());
    }
}
