//! Linear support vector classifier, squared hinge loss with an L2 penalty,
//! solved in the dual by coordinate descent with shrinking.

use serde::Serialize;
use tracing::{debug, warn};

use super::{check_x, check_xy, not_fitted, sorted_classes};
use crate::error::Result;
use crate::ml::Tensor;
use crate::utills::rand::XorShift64;

#[derive(Clone, Debug, Serialize)]
pub struct LinearSvc {
    pub c: f64,
    pub tol: f64,
    pub max_iter: usize,
    pub fit_intercept: bool,
    pub intercept_scaling: f64,
    pub seed: u64,
    classes: Vec<usize>,
    /// One weight row per binary problem.
    coef: Vec<Vec<f64>>,
    intercept: Vec<f64>,
    n_iter: usize,
}

impl Default for LinearSvc {
    fn default() -> Self {
        LinearSvc {
            c: 1.0,
            tol: 1e-4,
            max_iter: 1000,
            fit_intercept: true,
            intercept_scaling: 1.0,
            seed: 0,
            classes: Vec::new(),
            coef: Vec::new(),
            intercept: Vec::new(),
            n_iter: 0,
        }
    }
}

/// Weights (bias last when fitted) of one binary problem and the iteration count.
struct DualSolution {
    w: Vec<f64>,
    iterations: usize,
}

impl LinearSvc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&mut self, x: &Tensor, y: &[usize]) -> Result<&mut Self> {
        let (n, d) = check_xy(x, y)?;
        self.classes = sorted_classes(y)?;

        let rows = self.augmented_rows(x, n, d);
        let mut rng = XorShift64::new(self.seed);

        // binary problems fit one vector for the larger label
        let positives: Vec<usize> = if self.classes.len() == 2 {
            vec![self.classes[1]]
        } else {
            self.classes.clone()
        };

        self.coef.clear();
        self.intercept.clear();
        self.n_iter = 0;
        for positive in positives {
            let signs: Vec<f64> = y
                .iter()
                .map(|&label| if label == positive { 1.0 } else { -1.0 })
                .collect();
            let solution = self.solve_dual(&rows, &signs, &mut rng);
            self.n_iter = self.n_iter.max(solution.iterations);

            let mut w = solution.w;
            let b = if self.fit_intercept {
                w.pop().unwrap_or(0.0) * self.intercept_scaling
            } else {
                0.0
            };
            self.coef.push(w);
            self.intercept.push(b);
        }
        debug!(classes = self.classes.len(), n_iter = self.n_iter, "LinearSvc fitted");
        Ok(self)
    }

    fn augmented_rows(&self, x: &Tensor, n: usize, d: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let mut row: Vec<f64> = x.row(i).iter().map(|&v| v as f64).collect();
                if self.fit_intercept {
                    row.push(self.intercept_scaling);
                }
                debug_assert_eq!(row.len(), d + self.fit_intercept as usize);
                row
            })
            .collect()
    }

    fn solve_dual(&self, rows: &[Vec<f64>], signs: &[f64], rng: &mut XorShift64) -> DualSolution {
        let l = rows.len();
        let dim = rows.first().map_or(0, |r| r.len());
        let diag = 0.5 / self.c;

        let mut w = vec![0.0; dim];
        let mut alpha = vec![0.0; l];
        let qd: Vec<f64> = rows
            .iter()
            .map(|r| diag + r.iter().map(|v| v * v).sum::<f64>())
            .collect();

        let mut index: Vec<usize> = (0..l).collect();
        let mut active_size = l;
        let mut pg_max_old = f64::INFINITY;
        let mut pg_min_old = f64::NEG_INFINITY;
        let mut iter = 0;

        while iter < self.max_iter {
            let mut pg_max_new = f64::NEG_INFINITY;
            let mut pg_min_new = f64::INFINITY;

            rng.shuffle(&mut index[..active_size]);

            let mut s = 0;
            while s < active_size {
                let i = index[s];
                let xi = &rows[i];
                let yi = signs[i];
                let g = yi * dot(&w, xi) - 1.0 + diag * alpha[i];

                let mut pg = 0.0;
                if alpha[i] == 0.0 {
                    if g > pg_max_old {
                        active_size -= 1;
                        index.swap(s, active_size);
                        continue;
                    } else if g < 0.0 {
                        pg = g;
                    }
                } else {
                    pg = g;
                }

                pg_max_new = pg_max_new.max(pg);
                pg_min_new = pg_min_new.min(pg);

                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (alpha[i] - g / qd[i]).max(0.0);
                    let delta = (alpha[i] - old) * yi;
                    for (wj, xj) in w.iter_mut().zip(xi) {
                        *wj += delta * xj;
                    }
                }
                s += 1;
            }

            iter += 1;

            if pg_max_new - pg_min_new <= self.tol {
                if active_size == l {
                    break;
                }
                // converged on the shrunk set: check everything once more
                active_size = l;
                pg_max_old = f64::INFINITY;
                pg_min_old = f64::NEG_INFINITY;
                continue;
            }
            pg_max_old = if pg_max_new <= 0.0 { f64::INFINITY } else { pg_max_new };
            pg_min_old = if pg_min_new >= 0.0 { f64::NEG_INFINITY } else { pg_min_new };
        }

        if iter >= self.max_iter {
            warn!(max_iter = self.max_iter, "LinearSvc did not converge");
        }
        DualSolution {
            w,
            iterations: iter,
        }
    }

    /// Signed distance to each separating hyperplane: `[n]` for binary
    /// problems, `[n, classes]` otherwise.
    pub fn decision_function(&self, x: &Tensor) -> Result<Vec<Vec<f64>>> {
        let width = self.coef.first().map(|w| w.len()).ok_or_else(|| not_fitted("LinearSvc"))?;
        let (n, d) = check_x(x, Some(width))?;
        Ok((0..n)
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().map(|&v| v as f64).collect();
                debug_assert_eq!(row.len(), d);
                self.coef
                    .iter()
                    .zip(&self.intercept)
                    .map(|(w, b)| dot(w, &row) + b)
                    .collect()
            })
            .collect())
    }

    pub fn predict(&self, x: &Tensor) -> Result<Vec<usize>> {
        let scores = self.decision_function(x)?;
        Ok(scores
            .into_iter()
            .map(|s| {
                if self.classes.len() == 2 {
                    if s[0] > 0.0 {
                        self.classes[1]
                    } else {
                        self.classes[0]
                    }
                } else {
                    let best = s
                        .iter()
                        .enumerate()
                        .fold((0, f64::NEG_INFINITY), |acc, (k, &v)| if v > acc.1 { (k, v) } else { acc })
                        .0;
                    self.classes[best]
                }
            })
            .collect())
    }

    /// Mean accuracy on `(x, y)`.
    pub fn score(&self, x: &Tensor, y: &[usize]) -> Result<f32> {
        let pred = self.predict(x)?;
        Ok(crate::ml::metrics::accuracy_score(y, &pred))
    }

    pub fn coef(&self) -> &[Vec<f64>] {
        &self.coef
    }

    pub fn intercept(&self) -> &[f64] {
        &self.intercept
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
