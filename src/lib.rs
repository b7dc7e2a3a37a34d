#![allow(missing_docs)]
//! Supervised-learning studies on a small graph autograd engine
//!
//! `study_ml` runs four self-contained experiments:
//!
//! - a dense ReLU regressor on the diabetes progression data
//! - a ResNet classifier on CIFAR-10
//! - a linear support vector classifier on the logical AND table
//! - a random forest on the breast cancer data, with a feature-importance chart
//!
//! The networks are built from the pieces in [`ml`]: tensors, a computational
//! graph with reverse-mode differentiation, dense and convolutional layers,
//! losses and optimizers. The non-gradient models live in [`classic`].
//!
//! # Features
//!
//! - `logging`: TensorBoard scalars for the training loops (adds `tensorboard-rs`, `chrono`)
//! - `progress`: progress bars during training (adds `indicatif`)
//! - `full`: both
//!
//! # Usage Example
//!
//! ```no_run
//! use study_ml::config::StudyConfig;
//! use study_ml::experiments::and_gate;
//!
//! let config = StudyConfig::default();
//! let report = and_gate::run(&config.and_gate)?;
//! println!("{}", report);
//! # Ok::<(), study_ml::error::StudyError>(())
//! ```

/// Decision trees, random forests and the linear SVC.
pub mod classic;
/// TOML experiment settings.
pub mod config;
/// Dataset utilities for loading and batching data.
pub mod dataset;
pub mod error;
/// The four runnable studies and their reports.
pub mod experiments;
/// Core machine learning primitives including tensors, graphs, and layers.
pub mod ml;
/// SVG charts.
pub mod plot;
/// Train/test splitting and feature scaling.
pub mod preprocess;
/// Utility functions for random number generation and other helpers.
pub mod utills;

#[cfg(test)]
mod test;
