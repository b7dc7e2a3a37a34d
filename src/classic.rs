//! Classic (non-gradient) classifiers on `[n, d]` feature matrices with
//! `usize` labels.

/// Random forest built from [`tree::DecisionTreeClassifier`].
pub mod forest;
/// Linear support vector classifier.
pub mod svm;
/// CART decision tree with Gini impurity.
pub mod tree;

use crate::error::{Result, StudyError};
use crate::ml::Tensor;

/// Checks a training pair and returns `(n, d)`.
fn check_xy(x: &Tensor, y: &[usize]) -> Result<(usize, usize)> {
    let (n, d) = check_x(x, None)?;
    if n == 0 {
        return Err(StudyError::EmptyDataset("no training rows".into()));
    }
    if n != y.len() {
        return Err(StudyError::Shape {
            expected: vec![y.len(), d],
            found: x.shape.clone(),
        });
    }
    Ok((n, d))
}

/// Checks a feature matrix; `width` is the fitted feature count, `None` when
/// fitting.
fn check_x(x: &Tensor, width: Option<usize>) -> Result<(usize, usize)> {
    let (n, d) = match x.shape.as_slice() {
        &[n, d] => (n, d),
        _ => {
            return Err(StudyError::InvalidArgument(format!(
                "expected a [n, d] matrix, got {:?}",
                x.shape
            )))
        }
    };
    if let Some(width) = width {
        if width != d {
            return Err(StudyError::Shape {
                expected: vec![n, width],
                found: x.shape.clone(),
            });
        }
    }
    Ok((n, d))
}

/// Distinct labels in ascending order; at least two are required.
fn sorted_classes(y: &[usize]) -> Result<Vec<usize>> {
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    if classes.len() < 2 {
        return Err(StudyError::InvalidArgument(format!(
            "need at least two classes, found {:?}",
            classes
        )));
    }
    Ok(classes)
}

/// Error for prediction on a model that was never fitted.
fn not_fitted(model: &str) -> StudyError {
    StudyError::InvalidArgument(format!("{} used before fit", model))
}
