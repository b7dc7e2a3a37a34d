use std::collections::HashMap;

use super::{Optimizer, Tensor};

/// Plain gradient descent: `update = -lr * grad`.
pub struct SGD {
    lr: f32,
}

impl SGD {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl Optimizer for SGD {
    fn optimize(&mut self, _: usize, grads: Vec<&Tensor>) -> Vec<Tensor> {
        grads
            .into_iter()
            .map(|grad| {
                let data = grad.as_f32_slice().iter().map(|g| -g * self.lr).collect();
                Tensor::new(data, grad.shape.clone())
            })
            .collect()
    }
}

/// Moment estimates for the tensors of one node.
struct AdamState {
    m: Vec<Tensor>,
    v: Vec<Tensor>,
    step: u32,
}

impl AdamState {
    fn zeros_for(grads: &[&Tensor]) -> Self {
        AdamState {
            m: grads.iter().map(|g| Tensor::zeros_like(g)).collect(),
            v: grads.iter().map(|g| Tensor::zeros_like(g)).collect(),
            step: 0,
        }
    }
}

/// Adam with bias correction folded into the step size.
///
/// The default epsilon is `1e-7`, the value the Keras optimiser uses.
/// [`Adam::with_epsilon`] sets another one.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    state: HashMap<usize, AdamState>,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32, beta2: f32) -> Self {
        Self::with_epsilon(lr, beta1, beta2, 1e-7)
    }

    pub fn with_epsilon(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            lr,
            beta1,
            beta2,
            epsilon,
            state: HashMap::new(),
        }
    }

    /// `Adam(lr)` with `beta1 = 0.9`, `beta2 = 0.999`.
    pub fn with_lr(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999)
    }
}

impl Optimizer for Adam {
    fn optimize(&mut self, tar_id: usize, grads: Vec<&Tensor>) -> Vec<Tensor> {
        let state = self
            .state
            .entry(tar_id)
            .or_insert_with(|| AdamState::zeros_for(&grads));
        state.step += 1;
        let t = state.step as f32;

        let lr_t = self.lr * (1.0 - self.beta2.powf(t)).sqrt() / (1.0 - self.beta1.powf(t));

        let mut updates = Vec::with_capacity(grads.len());
        for ((grad, mi), vi) in grads.iter().zip(state.m.iter_mut()).zip(state.v.iter_mut()) {
            let mut update = Tensor::zeros_like(grad);

            let grad_f32 = grad.as_f32_slice();
            let mi_f32 = mi.f32_data_mut();
            let vi_f32 = vi.f32_data_mut();
            let update_f32 = update.f32_data_mut();

            for j in 0..grad_f32.len() {
                mi_f32[j] = self.beta1 * mi_f32[j] + (1.0 - self.beta1) * grad_f32[j];
                vi_f32[j] = self.beta2 * vi_f32[j] + (1.0 - self.beta2) * grad_f32[j] * grad_f32[j];
                update_f32[j] = -lr_t * mi_f32[j] / (vi_f32[j].sqrt() + self.epsilon);
            }
            updates.push(update);
        }

        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgd_steps_against_gradient() {
        let mut sgd = SGD::new(0.5);
        let g = Tensor::new(vec![1.0, -2.0], vec![2]);
        let up = sgd.optimize(0, vec![&g]);
        assert_eq!(up[0].as_f32_slice(), &[-0.5, 1.0]);
    }

    #[test]
    fn adam_first_step_is_lr_sized() {
        // after bias correction the first step is lr * g / (|g| + eps)
        let mut adam = Adam::with_lr(0.01);
        let g = Tensor::new(vec![4.0, -0.5], vec![2]);
        let up = adam.optimize(3, vec![&g]);
        let data = up[0].as_f32_slice();
        assert!((data[0] + 0.01).abs() < 1e-5);
        assert!((data[1] - 0.01).abs() < 1e-5);
    }

    #[test]
    fn adam_tracks_nodes_separately() {
        let mut adam = Adam::with_lr(0.1);
        let g = Tensor::new(vec![1.0], vec![1]);
        adam.optimize(0, vec![&g]);
        adam.optimize(0, vec![&g]);
        adam.optimize(1, vec![&g]);
        assert_eq!(adam.state[&0].step, 2);
        assert_eq!(adam.state[&1].step, 1);
    }
}
