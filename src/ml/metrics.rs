use super::Tensor;

/// Classification metrics for evaluating model performance
pub struct ClassificationMetrics;

impl ClassificationMetrics {
    /// Calculates accuracy for classification tasks.
    ///
    /// # Arguments
    /// * `predictions` - Model output, shape [batch, n_classes] or [batch]
    /// * `targets` - Ground truth, shape [batch, n_classes] (one-hot) or [batch] (labels)
    ///
    /// # Examples
    /// ```
    /// use study_ml::ml::Tensor;
    /// use study_ml::ml::metrics::ClassificationMetrics;
    ///
    /// let preds = Tensor::new(vec![0.1, 0.9, 0.8, 0.2], vec![2, 2]);
    /// let targets = Tensor::new(vec![0.0, 1.0, 1.0, 0.0], vec![2, 2]);
    /// assert_eq!(ClassificationMetrics::accuracy(&preds, &targets), 1.0);
    /// ```
    pub fn accuracy(predictions: &Tensor, targets: &Tensor) -> f32 {
        let (correct, total) = Self::correct_count(predictions, targets);
        correct as f32 / total as f32
    }

    /// Number of rows whose predicted class matches the target, and the row count.
    pub fn correct_count(predictions: &Tensor, targets: &Tensor) -> (usize, usize) {
        let pred_labels = Self::labels_of(predictions);
        let true_labels = Self::labels_of(targets);

        let pred_data = pred_labels.as_f32_slice();
        let true_data = true_labels.as_f32_slice();

        assert_eq!(
            pred_data.len(),
            true_data.len(),
            "Predictions and targets must have same batch size"
        );

        let correct = pred_data
            .iter()
            .zip(true_data)
            .filter(|(a, b)| (*a - *b).abs() < 1e-6)
            .count();
        (correct, pred_data.len())
    }

    fn labels_of(tensor: &Tensor) -> Tensor {
        if tensor.shape.len() == 1 {
            // already label indices
            tensor.clone()
        } else {
            tensor.argmax(Some(tensor.shape.len() - 1))
        }
    }
}

/// Convenience function for accuracy calculation
pub fn accuracy(predictions: &Tensor, targets: &Tensor) -> f32 {
    ClassificationMetrics::accuracy(predictions, targets)
}

/// Fraction of equal labels.
pub fn accuracy_score(y_true: &[usize], y_pred: &[usize]) -> f32 {
    assert_eq!(y_true.len(), y_pred.len());
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(a, b)| a == b).count();
    correct as f32 / y_true.len() as f32
}

pub fn mean_squared_error(y_true: &[f32], y_pred: &[f32]) -> f32 {
    assert_eq!(y_true.len(), y_pred.len());
    let sum: f32 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    sum / y_true.len() as f32
}

pub fn mean_absolute_error(y_true: &[f32], y_pred: &[f32]) -> f32 {
    assert_eq!(y_true.len(), y_pred.len());
    let sum: f32 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum();
    sum / y_true.len() as f32
}

pub fn rmse(y_true: &[f32], y_pred: &[f32]) -> f32 {
    mean_squared_error(y_true, y_pred).sqrt()
}

/// Coefficient of determination `1 - SS_res / SS_tot`.
///
/// A constant target has `SS_tot = 0`; the score is then 1.0 for an exact fit
/// and 0.0 otherwise.
pub fn r2_score(y_true: &[f32], y_pred: &[f32]) -> f32 {
    assert_eq!(y_true.len(), y_pred.len());
    let n = y_true.len() as f64;
    let mean = y_true.iter().map(|&v| v as f64).sum::<f64>() / n;

    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| (t as f64 - p as f64).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|&t| (t as f64 - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - ss_res / ss_tot) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_with_label_targets() {
        let preds = Tensor::new(vec![0.2, 0.8, 0.6, 0.4, 0.3, 0.7], vec![3, 2]);
        let labels = Tensor::new(vec![1.0, 1.0, 1.0], vec![3]);
        let acc = accuracy(&preds, &labels);
        assert!((acc - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn accuracy_score_counts_matches() {
        assert_eq!(accuracy_score(&[0, 0, 0, 1], &[0, 0, 0, 1]), 1.0);
        assert_eq!(accuracy_score(&[0, 1], &[1, 1]), 0.5);
    }

    #[test]
    fn regression_errors() {
        let t = [1.0, 2.0, 3.0];
        let p = [1.0, 2.0, 5.0];
        assert!((mean_squared_error(&t, &p) - 4.0 / 3.0).abs() < 1e-6);
        assert!((mean_absolute_error(&t, &p) - 2.0 / 3.0).abs() < 1e-6);
        assert!((rmse(&t, &p) - (4.0f32 / 3.0).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn r2_perfect_and_mean_predictor() {
        let t = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(r2_score(&t, &t), 1.0);
        assert!(r2_score(&t, &[2.5; 4]).abs() < 1e-6);
    }

    #[test]
    fn r2_constant_target() {
        assert_eq!(r2_score(&[3.0, 3.0], &[3.0, 3.0]), 1.0);
        assert_eq!(r2_score(&[3.0, 3.0], &[3.0, 2.0]), 0.0);
    }
}
