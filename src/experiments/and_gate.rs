//! Linear SVC on the logical AND truth table.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::classic::svm::LinearSvc;
use crate::config::AndGateConfig;
use crate::error::Result;
use crate::ml::metrics::accuracy_score;
use crate::ml::Tensor;

pub const X: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
pub const Y: [usize; 4] = [0, 0, 0, 1];

#[derive(Clone, Debug, Serialize)]
pub struct AndGateReport {
    pub inputs: Vec<[f32; 2]>,
    pub predictions: Vec<usize>,
    pub score: f32,
    pub accuracy: f32,
    pub coef: Vec<f64>,
    pub intercept: f64,
    pub iterations: usize,
}

impl fmt::Display for AndGateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?} predicted : {:?}", self.inputs, self.predictions)?;
        writeln!(f, "model.score : {}", self.score)?;
        write!(f, "accuracy_score : {}", self.accuracy)
    }
}

pub fn run(cfg: &AndGateConfig) -> Result<AndGateReport> {
    let x = Tensor::new(X.iter().flatten().copied().collect(), vec![X.len(), 2]);

    let mut model = LinearSvc::new().with_c(cfg.c).with_seed(cfg.seed);
    model.tol = cfg.tol;
    model.max_iter = cfg.max_iter;
    model.fit(&x, &Y)?;

    let score = model.score(&x, &Y)?;
    let predictions = model.predict(&x)?;
    let accuracy = accuracy_score(&Y, &predictions);
    info!(iterations = model.n_iter(), score, "linear svc fitted");

    Ok(AndGateReport {
        inputs: X.to_vec(),
        predictions,
        score,
        accuracy,
        coef: model.coef().first().cloned().unwrap_or_default(),
        intercept: model.intercept().first().copied().unwrap_or_default(),
        iterations: model.n_iter(),
    })
}
