//! Splitting and scaling of feature matrices.

use crate::error::{Result, StudyError};
use crate::ml::Tensor;
use crate::utills::rand::XorShift64;

/// Rescales every column of a `[n, d]` matrix to [0, 1] using the minimum and
/// maximum seen in `fit`. Columns that were constant during `fit` keep a
/// scale of 1, so they map to 0.
#[derive(Clone, Debug, Default)]
pub struct MinMaxScaler {
    min: Vec<f32>,
    scale: Vec<f32>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, x: &Tensor) -> Result<&mut Self> {
        let (n, d) = matrix_dims(x)?;
        if n == 0 {
            return Err(StudyError::EmptyDataset("cannot fit a scaler on zero rows".into()));
        }
        let data = x.as_f32_slice();
        let mut min = vec![f32::INFINITY; d];
        let mut max = vec![f32::NEG_INFINITY; d];
        for row in data.chunks_exact(d) {
            for c in 0..d {
                min[c] = min[c].min(row[c]);
                max[c] = max[c].max(row[c]);
            }
        }
        self.scale = min
            .iter()
            .zip(&max)
            .map(|(lo, hi)| if hi > lo { hi - lo } else { 1.0 })
            .collect();
        self.min = min;
        Ok(self)
    }

    pub fn is_fitted(&self) -> bool {
        !self.min.is_empty()
    }

    pub fn transform(&self, x: &Tensor) -> Result<Tensor> {
        let (_, d) = matrix_dims(x)?;
        if !self.is_fitted() {
            return Err(StudyError::InvalidArgument("scaler used before fit".into()));
        }
        if d != self.min.len() {
            return Err(StudyError::Shape {
                expected: vec![x.shape[0], self.min.len()],
                found: x.shape.clone(),
            });
        }
        let mut out = x.clone();
        for row in out.f32_data_mut().chunks_exact_mut(d) {
            for c in 0..d {
                row[c] = (row[c] - self.min[c]) / self.scale[c];
            }
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, x: &Tensor) -> Result<Tensor> {
        self.fit(x)?;
        self.transform(x)
    }
}

fn matrix_dims(x: &Tensor) -> Result<(usize, usize)> {
    match x.shape.as_slice() {
        &[_, 0] => Err(StudyError::InvalidArgument(
            "a [n, d] matrix needs at least one column".into(),
        )),
        &[n, d] => Ok((n, d)),
        _ => Err(StudyError::InvalidArgument(format!(
            "expected a [n, d] matrix, got {:?}",
            x.shape
        ))),
    }
}

const MILLION: u128 = 1_000_000;

/// An f32 fraction in [0, 1] as its nearest count of millionths. `0.2f32`
/// widens to slightly more than 0.2, its decimal form does not.
fn millionths(fraction: f32) -> u128 {
    (fraction.clamp(0.0, 1.0) as f64 * MILLION as f64).round() as u128
}

/// `ceil(millionths * n / 1e6)` in integers.
fn ceil_count(millionths: u128, n: usize) -> usize {
    (millionths * n as u128).div_ceil(MILLION) as usize
}

/// Shuffled train/test row indices.
///
/// `n_test = ceil((1 - train_size) * n)`, the remaining rows train. The
/// permutation comes from a generator seeded with `seed`, so equal seeds give
/// equal splits.
pub fn train_test_split(n: usize, train_size: f32, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(train_size > 0.0 && train_size < 1.0) {
        return Err(StudyError::InvalidArgument(format!(
            "train_size must be in (0, 1), got {}",
            train_size
        )));
    }
    let n_test = ceil_count(MILLION - millionths(train_size), n);
    if n_test == 0 || n_test >= n {
        return Err(StudyError::InvalidArgument(format!(
            "train_size {} leaves an empty split of {} rows",
            train_size, n
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    XorShift64::new(seed).shuffle(&mut indices);
    let test = indices.split_off(n - n_test);
    Ok((indices, test))
}

/// Holds out the last `ceil(fraction * n)` rows for validation, in order.
pub fn validation_split(n: usize, fraction: f32) -> (Vec<usize>, Vec<usize>) {
    let n_val = ceil_count(millionths(fraction), n);
    let cut = n - n_val.min(n);
    ((0..cut).collect(), (cut..n).collect())
}

/// Rows of a tensor whose first dimension is the batch, in the given order.
pub fn take_rows(x: &Tensor, rows: &[usize]) -> Tensor {
    let width: usize = x.shape.iter().skip(1).product();
    let mut data = Vec::with_capacity(rows.len() * width);
    for &r in rows {
        data.extend_from_slice(x.row(r));
    }
    let mut shape = x.shape.clone();
    shape[0] = rows.len();
    Tensor::new(data, shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minmax_maps_training_range_to_unit() {
        let x = Tensor::new(vec![1.0, 5.0, 3.0, 5.0, 5.0, 5.0], vec![3, 2]);
        let mut scaler = MinMaxScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();
        assert_eq!(scaled.as_f32_slice(), &[0.0, 0.0, 0.5, 0.0, 1.0, 0.0]);

        // unseen rows may fall outside [0, 1]
        let other = Tensor::new(vec![7.0, 6.0], vec![1, 2]);
        assert_eq!(scaler.transform(&other).unwrap().as_f32_slice(), &[1.5, 1.0]);
    }

    #[test]
    fn minmax_rejects_wrong_width() {
        let mut scaler = MinMaxScaler::new();
        scaler.fit(&Tensor::zeros(vec![2, 3])).unwrap();
        assert!(scaler.transform(&Tensor::zeros(vec![2, 2])).is_err());
        assert!(MinMaxScaler::new().transform(&Tensor::zeros(vec![1, 3])).is_err());
    }

    #[test]
    fn split_sizes_follow_ceil() {
        let (train, test) = train_test_split(442, 0.8, 66).unwrap();
        assert_eq!(test.len(), 89);
        assert_eq!(train.len(), 353);

        let (train, test) = train_test_split(569, 0.8, 23).unwrap();
        assert_eq!((train.len(), test.len()), (455, 114));

        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..569).collect::<Vec<_>>());
    }

    #[test]
    fn split_is_reproducible() {
        assert_eq!(
            train_test_split(50, 0.8, 7).unwrap(),
            train_test_split(50, 0.8, 7).unwrap()
        );
        assert_ne!(
            train_test_split(50, 0.8, 7).unwrap().1,
            train_test_split(50, 0.8, 8).unwrap().1
        );
        assert!(train_test_split(10, 1.0, 0).is_err());
    }

    #[test]
    fn validation_takes_the_tail() {
        let (train, val) = validation_split(353, 0.2);
        assert_eq!(val.len(), 71);
        assert_eq!(train.len(), 282);
        assert_eq!(val[0], 282);
        assert_eq!(*val.last().unwrap(), 352);

        // 0.2f32 * 40 is a hair above 8
        assert_eq!(validation_split(40, 0.2).1.len(), 8);
        assert_eq!(train_test_split(100, 0.9, 1).unwrap().1.len(), 10);
    }

    #[test]
    fn large_splits_still_round_up() {
        // 0.2 * 1_000_002 = 200000.4
        let (train, test) = train_test_split(1_000_002, 0.8, 1).unwrap();
        assert_eq!(test.len(), 200_001);
        assert_eq!(train.len(), 800_001);

        // 0.3 * 1_000_001 = 300000.3
        assert_eq!(validation_split(1_000_001, 0.3).1.len(), 300_001);
        assert_eq!(validation_split(1_000_000, 0.3).1.len(), 300_000);
    }

    #[test]
    fn zero_width_matrices_are_rejected() {
        let mut scaler = MinMaxScaler::new();
        assert!(matches!(
            scaler.fit(&Tensor::zeros(vec![3, 0])),
            Err(StudyError::InvalidArgument(_))
        ));
        assert!(!scaler.is_fitted());
        assert!(scaler.transform(&Tensor::zeros(vec![3, 0])).is_err());
    }

    #[test]
    fn take_rows_reorders() {
        let x = Tensor::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], vec![3, 2]);
        let y = take_rows(&x, &[2, 0]);
        assert_eq!(y.shape, vec![2, 2]);
        assert_eq!(y.as_f32_slice(), &[4.0, 5.0, 0.0, 1.0]);

        let empty = take_rows(&Tensor::zeros(vec![0, 3]), &[]);
        assert_eq!(empty.shape, vec![0, 3]);
    }
}
