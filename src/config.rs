//! Experiment settings, read from TOML. Every field has a default, so an
//! empty file (or none at all) runs the experiments with their reference
//! hyper-parameters.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classic::tree::MaxFeatures;
use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub diabetes: DiabetesConfig,
    pub cifar: CifarConfig,
    pub and_gate: AndGateConfig,
    pub cancer: CancerConfig,
}

impl StudyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Dense regressor on the diabetes set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiabetesConfig {
    /// Directory holding `diabetes_data_raw.csv[.gz]` and `diabetes_target.csv[.gz]`.
    pub data_dir: PathBuf,
    pub train_size: f32,
    /// Seed of the train/test split.
    pub split_seed: u64,
    /// Seed of weight initialisation and batch shuffling.
    pub seed: u64,
    /// Apply the scaler fitted on the training rows to the test rows as well.
    pub scale_test: bool,
    pub validation_split: f32,
    pub hidden: usize,
    pub depth: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Stop after this many epochs without validation improvement.
    pub patience: Option<usize>,
    pub min_delta: f32,
    pub checkpoint_dir: Option<PathBuf>,
    /// Write scalars to a TensorBoard run (needs the `logging` feature).
    pub tensorboard: bool,
}

impl Default for DiabetesConfig {
    fn default() -> Self {
        DiabetesConfig {
            data_dir: PathBuf::from("data/diabetes"),
            train_size: 0.8,
            split_seed: 66,
            seed: 0,
            scale_test: true,
            validation_split: 0.2,
            hidden: 120,
            depth: 8,
            epochs: 130,
            batch_size: 6,
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            patience: None,
            min_delta: 0.0,
            checkpoint_dir: None,
            tensorboard: false,
        }
    }
}

/// ResNet on CIFAR-10.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CifarConfig {
    /// Directory with the `.bin` batches, or its parent.
    pub data_dir: PathBuf,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Adam epsilon, `1e-8` as in PyTorch.
    pub epsilon: f32,
    /// Batches between two training log lines.
    pub log_interval: usize,
    pub shuffle: bool,
    /// Random horizontal flip on the test images too.
    pub flip_test: bool,
    pub train_limit: Option<usize>,
    pub test_limit: Option<usize>,
    pub seed: u64,
    pub checkpoint_dir: Option<PathBuf>,
    pub tensorboard: bool,
}

impl Default for CifarConfig {
    fn default() -> Self {
        CifarConfig {
            data_dir: PathBuf::from("data"),
            batch_size: 32,
            epochs: 10,
            learning_rate: 1e-3,
            epsilon: 1e-8,
            log_interval: 200,
            shuffle: false,
            flip_test: false,
            train_limit: None,
            test_limit: None,
            seed: 0,
            checkpoint_dir: None,
            tensorboard: false,
        }
    }
}

/// Linear SVC on the logical AND table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AndGateConfig {
    pub c: f64,
    pub tol: f64,
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for AndGateConfig {
    fn default() -> Self {
        AndGateConfig {
            c: 1.0,
            tol: 1e-4,
            max_iter: 1000,
            seed: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CancerModel {
    #[default]
    Forest,
    Tree,
}

/// Tree ensemble on the breast cancer set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancerConfig {
    pub data_path: PathBuf,
    pub train_size: f32,
    pub split_seed: u64,
    /// Columns kept for training, by index.
    pub columns: Vec<usize>,
    pub model: CancerModel,
    pub n_estimators: usize,
    pub max_features: MaxFeatures,
    pub max_depth: Option<usize>,
    /// Seed of the forest (or tree) generator.
    pub seed: u64,
    /// How many of the least important features to report.
    pub least_important: usize,
    pub plot_path: Option<PathBuf>,
}

impl Default for CancerConfig {
    fn default() -> Self {
        CancerConfig {
            data_path: PathBuf::from("data/breast_cancer.csv"),
            train_size: 0.8,
            split_seed: 23,
            columns: vec![0, 2, 3],
            model: CancerModel::Forest,
            n_estimators: 100,
            max_features: MaxFeatures::Sqrt,
            max_depth: None,
            seed: 0,
            least_important: 1,
            plot_path: Some(PathBuf::from("feature_importances.svg")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: StudyConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, StudyConfig::default());
        assert_eq!(cfg.diabetes.epochs, 130);
        assert_eq!(cfg.cifar.batch_size, 32);
        assert_eq!(cfg.cifar.epsilon, 1e-8);
        assert_eq!(cfg.cancer.columns, vec![0, 2, 3]);
    }

    #[test]
    fn sections_override_single_fields() {
        let cfg: StudyConfig = toml::from_str(
            r#"
            [diabetes]
            epochs = 5
            patience = 3

            [cancer]
            model = "tree"
            max_features = "all"

            [cifar]
            train_limit = 64
            "#,
        )
        .unwrap();
        assert_eq!(cfg.diabetes.epochs, 5);
        assert_eq!(cfg.diabetes.patience, Some(3));
        assert_eq!(cfg.diabetes.batch_size, 6);
        assert_eq!(cfg.cancer.model, CancerModel::Tree);
        assert_eq!(cfg.cancer.max_features, MaxFeatures::All);
        assert_eq!(cfg.cifar.train_limit, Some(64));
        assert_eq!(cfg.and_gate, AndGateConfig::default());
    }

    #[test]
    fn load_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.toml");
        std::fs::write(&path, "[diabetes]\nepochs = \"many\"\n").unwrap();
        assert!(matches!(
            StudyConfig::load(&path),
            Err(crate::error::StudyError::Config(_))
        ));
        assert!(StudyConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
