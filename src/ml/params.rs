use std::path::PathBuf;

use super::binary_io::{load_tensors, save_tensors, TYPE_LINEAR, TYPE_PARAMETER};
use super::xavier_vec;
use super::{Node, Result, Tensor};

/// Free-standing trainable tensor. It has no inputs and emits its value.
pub struct Parameter {
    pub tensor: Tensor,
    pub grad: Option<Tensor>,
}

impl Parameter {
    pub fn new(tensor: Tensor) -> Self {
        Self {
            tensor,
            grad: None,
        }
    }
}

impl Node for Parameter {
    fn backward(&mut self, grad: &Tensor, _: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        match self.grad.as_mut() {
            Some(acc) => *acc += grad,
            None => self.grad = Some(grad.clone()),
        }
        vec![]
    }

    fn call(&mut self, _: Vec<Tensor>) -> Tensor {
        self.tensor.clone()
    }

    fn has_params(&self) -> bool {
        true
    }

    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        Some(vec![self.grad.as_ref()?])
    }

    fn param_count(&self) -> usize {
        self.tensor.len()
    }

    fn apply_update(&mut self, update: Vec<Tensor>) {
        self.tensor += &update[0];
        self.grad = None;
    }

    fn save_param(&self, path: PathBuf) -> Result<()> {
        save_tensors(&path, TYPE_PARAMETER, &[&self.tensor])
    }

    fn load_param(&mut self, path: PathBuf) -> Result<()> {
        if let Some(tensor) = load_tensors(&path, TYPE_PARAMETER, &[self.tensor.shape.as_slice()])?.pop() {
            self.tensor = tensor;
        }
        Ok(())
    }
}

/// Fully connected layer `y = x W^T + b` applied over the last dimension.
pub struct Linear {
    pub w: Tensor,
    pub b: Tensor,
    pub height: usize,
    pub width: usize,
    pub w_grad: Option<Tensor>,
    pub b_grad: Option<Tensor>,
}

impl Linear {
    pub fn new(w: Tensor, b: Tensor) -> Self {
        assert_eq!(w.shape.len(), 2);
        assert_eq!(b.shape.len(), 1);
        assert_eq!(b.shape[0], w.shape[0]);

        let height = w.shape[0];
        let width = w.shape[1];
        Self {
            w,
            b,
            height,
            width,
            w_grad: None,
            b_grad: None,
        }
    }

    pub fn auto(input_size: usize, output_size: usize) -> Self {
        let weight = xavier_vec(input_size, output_size * input_size);
        let weight = Tensor::new(weight, vec![output_size, input_size]);
        let b = Tensor::zeros(vec![output_size]);
        Linear::new(weight, b)
    }
}

impl Node for Linear {
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let input = inputs[0];
        let in_features = self.width;
        let out_features = self.height;

        // every dimension but the last is batch
        let batch = input.len() / in_features;

        let mut w_grad = Tensor::zeros_like(&self.w);
        let mut b_grad = Tensor::zeros_like(&self.b);
        let mut input_grad = Tensor::zeros_like(input);

        let grad_data = grad.as_f32_slice();
        let input_data = input.as_f32_slice();
        let w_data = self.w.as_f32_slice();

        let w_grad_f32 = w_grad.f32_data_mut();
        let b_grad_f32 = b_grad.f32_data_mut();
        let input_grad_f32 = input_grad.f32_data_mut();

        for b in 0..batch {
            let offset_input = b * in_features;
            let offset_grad = b * out_features;
            for i in 0..out_features {
                let gi = grad_data[offset_grad + i];
                if gi == 0.0 {
                    continue;
                }
                b_grad_f32[i] += gi;
                for j in 0..in_features {
                    w_grad_f32[i * in_features + j] += gi * input_data[offset_input + j];
                    input_grad_f32[offset_input + j] += gi * w_data[i * in_features + j];
                }
            }
        }

        match self.w_grad.as_mut() {
            Some(acc) => *acc += w_grad,
            None => self.w_grad = Some(w_grad),
        }
        match self.b_grad.as_mut() {
            Some(acc) => *acc += b_grad,
            None => self.b_grad = Some(b_grad),
        }

        vec![input_grad]
    }

    fn call(&mut self, input_vec: Vec<Tensor>) -> Tensor {
        assert_eq!(input_vec.len(), 1);
        let input = &input_vec[0];

        let input_f32 = input.as_f32_slice();
        let in_features = *input.shape.last().expect("Linear input has no dimensions");
        assert_eq!(
            in_features, self.width,
            "Linear expects {} input features, got shape {:?}",
            self.width, input.shape
        );

        let batch = input_f32.len() / in_features;

        let mut ans_shape = input.shape.clone();
        *ans_shape.last_mut().unwrap() = self.height;
        let mut ans_data = vec![0.0; batch * self.height];
        let w_f32 = self.w.as_f32_slice();
        let b_f32 = self.b.as_f32_slice();

        for b in 0..batch {
            let x = &input_f32[b * in_features..(b + 1) * in_features];
            let offset_ans = b * self.height;
            for i in 0..self.height {
                let w_row = &w_f32[i * in_features..(i + 1) * in_features];
                let dot: f32 = x.iter().zip(w_row).map(|(a, b)| a * b).sum();
                ans_data[offset_ans + i] = b_f32[i] + dot;
            }
        }
        Tensor::new(ans_data, ans_shape)
    }

    fn has_params(&self) -> bool {
        true
    }

    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        Some(vec![self.w_grad.as_ref()?, self.b_grad.as_ref()?])
    }

    fn param_count(&self) -> usize {
        self.w.len() + self.b.len()
    }

    fn apply_update(&mut self, update: Vec<Tensor>) {
        self.w += &update[0];
        self.b += &update[1];

        self.w_grad = None;
        self.b_grad = None;
    }

    fn save_param(&self, path: PathBuf) -> Result<()> {
        save_tensors(&path, TYPE_LINEAR, &[&self.w, &self.b])
    }

    fn load_param(&mut self, path: PathBuf) -> Result<()> {
        let mut tensors = load_tensors(&path, TYPE_LINEAR, &[self.w.shape.as_slice(), self.b.shape.as_slice()])?.into_iter();
        if let (Some(w), Some(b)) = (tensors.next(), tensors.next()) {
            self.w = w;
            self.b = b;
        }
        Ok(())
    }
}
