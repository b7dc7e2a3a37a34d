use super::Node;
use super::Tensor;

#[derive(Default)]
pub struct ReLU {}

impl ReLU {
    pub fn new() -> Self {
        ReLU {}
    }
}

impl Node for ReLU {
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let mut igrad = Tensor::zeros_like(inputs[0]);
        let grad_data = grad.as_f32_slice();
        let input_data = inputs[0].as_f32_slice();

        for (i, g) in igrad.f32_data_mut().iter_mut().enumerate() {
            if input_data[i] > 0.0 {
                *g = grad_data[i];
            }
        }

        vec![igrad]
    }
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let input = &input[0];
        let output_vec = input.as_f32_slice().iter().map(|x| x.max(0.0)).collect();

        Tensor::new(output_vec, input.shape.clone())
    }
}

/// Softmax over the last dimension.
#[derive(Default)]
pub struct Softmax {}

impl Softmax {
    pub fn new() -> Self {
        Softmax {}
    }
}

impl Node for Softmax {
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let input = &input[0];
        let classes = *input.shape.last().unwrap_or(&1);
        let mut out = Tensor::zeros_like(input);

        for (row, out_row) in input
            .as_f32_slice()
            .chunks(classes)
            .zip(out.f32_data_mut().chunks_mut(classes))
        {
            let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let mut sum = 0.0;
            for (o, x) in out_row.iter_mut().zip(row) {
                *o = (x - max).exp();
                sum += *o;
            }
            for o in out_row.iter_mut() {
                *o /= sum;
            }
        }
        out
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, output: &Tensor) -> Vec<Tensor> {
        let classes = *inputs[0].shape.last().unwrap_or(&1);
        let mut igrad = Tensor::zeros_like(inputs[0]);

        // dx_i = y_i * (g_i - sum_j g_j y_j)
        for ((y, g), dx) in output
            .as_f32_slice()
            .chunks(classes)
            .zip(grad.as_f32_slice().chunks(classes))
            .zip(igrad.f32_data_mut().chunks_mut(classes))
        {
            let dot: f32 = y.iter().zip(g).map(|(a, b)| a * b).sum();
            for i in 0..classes {
                dx[i] = y[i] * (g[i] - dot);
            }
        }
        vec![igrad]
    }
}

/// Mean squared error between a prediction and a target of the same size.
/// Yields a single-element tensor.
#[derive(Default)]
pub struct MSE {}

impl MSE {
    pub fn new() -> Self {
        MSE {}
    }
}

impl Node for MSE {
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 2);
        let left = input[0].as_f32_slice();
        let right = input[1].as_f32_slice();
        assert_eq!(
            left.len(),
            right.len(),
            "MSE operands differ: {:?} vs {:?}",
            input[0].shape,
            input[1].shape
        );

        let loss: f32 = left.iter().zip(right).map(|(l, r)| (l - r).powi(2)).sum();

        Tensor::new(vec![loss / left.len() as f32], vec![1])
    }
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let mut left = Tensor::zeros_like(inputs[0]);
        let mut right = Tensor::zeros_like(inputs[1]);
        let in_left = inputs[0].as_f32_slice();
        let in_right = inputs[1].as_f32_slice();
        let g = grad.get_item().unwrap_or(1.0);
        let scale = 2.0 * g / in_left.len() as f32;

        let left_f32 = left.f32_data_mut();
        let right_f32 = right.f32_data_mut();
        for i in 0..left_f32.len() {
            left_f32[i] = (in_left[i] - in_right[i]) * scale;
            right_f32[i] = -left_f32[i];
        }

        vec![left, right]
    }
}

/// Mean absolute error. Used as a metric node next to the training loss.
#[derive(Default)]
pub struct MAE {}

impl MAE {
    pub fn new() -> Self {
        MAE {}
    }
}

impl Node for MAE {
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 2);
        let left = input[0].as_f32_slice();
        let right = input[1].as_f32_slice();
        assert_eq!(left.len(), right.len());

        let loss: f32 = left.iter().zip(right).map(|(l, r)| (l - r).abs()).sum();

        Tensor::new(vec![loss / left.len() as f32], vec![1])
    }
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let mut left = Tensor::zeros_like(inputs[0]);
        let mut right = Tensor::zeros_like(inputs[1]);
        let in_left = inputs[0].as_f32_slice();
        let in_right = inputs[1].as_f32_slice();
        let g = grad.get_item().unwrap_or(1.0);
        let scale = g / in_left.len() as f32;

        let left_f32 = left.f32_data_mut();
        let right_f32 = right.f32_data_mut();
        for i in 0..left_f32.len() {
            let diff = in_left[i] - in_right[i];
            let sign = if diff > 0.0 {
                1.0
            } else if diff < 0.0 {
                -1.0
            } else {
                0.0
            };
            left_f32[i] = sign * scale;
            right_f32[i] = -sign * scale;
        }

        vec![left, right]
    }
}

/// Cross Entropy Loss for multi-class classification
/// Combines Softmax + Negative Log Likelihood in one stable operation
/// Input: (predictions, targets) where predictions are raw logits (before softmax)
/// and targets are one-hot encoded labels
pub struct CrossEntropyLoss {
    eps: f32,
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        CrossEntropyLoss { eps: 1e-7 }
    }

    fn softmax_row(&self, logits: &[f32]) -> Vec<f32> {
        let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let mut probs: Vec<f32> = logits.iter().map(|l| (l - max_logit).exp()).collect();
        let sum: f32 = probs.iter().sum();
        for p in probs.iter_mut() {
            *p /= sum + self.eps;
        }
        probs
    }
}

impl Node for CrossEntropyLoss {
    fn call(&mut self, inputs: Vec<Tensor>) -> Tensor {
        assert_eq!(inputs.len(), 2);
        let logits = inputs[0].as_f32_slice();
        let targets = inputs[1].as_f32_slice();
        assert_eq!(
            logits.len(),
            targets.len(),
            "logits {:?} and one-hot targets {:?} differ",
            inputs[0].shape,
            inputs[1].shape
        );

        let batch_size = inputs[0].shape[0];
        let num_classes = logits.len() / batch_size;
        let mut total_loss = 0.0;

        for b in 0..batch_size {
            let range = b * num_classes..(b + 1) * num_classes;
            let probs = self.softmax_row(&logits[range.clone()]);
            for (p, t) in probs.iter().zip(&targets[range]) {
                if *t != 0.0 {
                    total_loss -= t * (p + self.eps).ln();
                }
            }
        }

        Tensor::new(vec![total_loss / batch_size as f32], vec![1])
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _output: &Tensor) -> Vec<Tensor> {
        let logits = inputs[0].as_f32_slice();
        let targets = inputs[1].as_f32_slice();
        let g = grad.get_item().unwrap_or(1.0);

        let batch_size = inputs[0].shape[0];
        let num_classes = logits.len() / batch_size;

        let mut logits_grad = Tensor::zeros_like(inputs[0]);
        let logits_grad_data = logits_grad.f32_data_mut();

        for b in 0..batch_size {
            let offset = b * num_classes;
            let probs = self.softmax_row(&logits[offset..offset + num_classes]);

            // (softmax - target) / batch_size
            for i in 0..num_classes {
                logits_grad_data[offset + i] =
                    (probs[i] - targets[offset + i]) * g / batch_size as f32;
            }
        }

        vec![logits_grad, Tensor::zeros_like(inputs[1])]
    }
}
