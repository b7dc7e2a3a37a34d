/// Binary I/O utilities for model parameters.
pub(crate) mod binary_io;
/// Image layers: convolution, batch normalisation, pooling.
pub mod conv;
/// Activation functions and loss functions.
pub mod funcs;
/// TensorBoard logging for training (requires `logging` feature).
#[cfg(feature = "logging")]
pub mod logger;
/// Metrics for model evaluation.
pub mod metrics;
/// Network builders used by the experiments.
pub mod models;
/// Element-wise tensor operations.
pub mod ops;
/// Optimization algorithms (SGD, Adam).
pub mod optim;
/// Dense layer parameters.
pub mod params;
/// Progress tracking utilities.
pub mod progress;

/// Macro to create a sequential neural network layer composition.
///
/// # Example
/// ```ignore
/// let output_id = sequential!(graph, input_id, [
///     Linear::auto(10, 120),
///     ReLU::new(),
///     Linear::auto(120, 1),
/// ]);
/// ```
#[macro_export]
macro_rules! sequential {
    ($graph:expr, $input:expr, [$($node:expr),* $(,)?]) => {{
        let g = &mut $graph;
        let mut last_id = $input;
        $(
            last_id = g.add_layer(vec![last_id], Box::new($node));
        )*
        last_id
    }};
}

use crate::utills::rand::get_random_normal;

pub type Result<T> = std::result::Result<T, std::io::Error>;

use std::fs;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

/// Creates a random vector using Xavier initialization.
///
/// # Arguments
/// * `n` - Input dimension for scaling
/// * `size` - Size of the output vector
pub fn xavier_vec(n: usize, size: usize) -> Vec<f32> {
    let sigma = (1.0 / n as f32).sqrt();

    get_random_normal(size, 0.0, sigma)
}

/// Creates a random vector using He initialization (for ReLU networks).
pub fn he_vec(fan_in: usize, size: usize) -> Vec<f32> {
    let sigma = (2.0 / fan_in as f32).sqrt();

    get_random_normal(size, 0.0, sigma)
}

/// Multi-dimensional array for neural network computations.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Tensor {
    pub fn zeros_like(tensor: &Tensor) -> Self {
        Tensor {
            data: vec![0.0; tensor.len()],
            shape: tensor.shape.clone(),
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Tensor {
            data: vec![0.0; size],
            shape,
        }
    }

    pub fn ones_like(tensor: &Tensor) -> Self {
        Tensor {
            data: vec![1.0; tensor.len()],
            shape: tensor.shape.clone(),
        }
    }

    pub fn ones(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        Tensor {
            data: vec![1.0; size],
            shape,
        }
    }

    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        assert_eq!(
            size,
            data.len(),
            "shape {:?} needs {} values, got {}",
            shape,
            size,
            data.len()
        );
        Tensor { data, shape }
    }

    pub fn null() -> Self {
        Tensor {
            data: Vec::new(),
            shape: Vec::new(),
        }
    }

    pub fn get_item(&self) -> Option<f32> {
        if self.len() == 1 {
            Some(self.data[0])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_f32_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn f32_data_mut(&mut self) -> &mut Vec<f32> {
        &mut self.data
    }

    /// Same data viewed with another shape of equal size.
    pub fn reshape(mut self, shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        assert_eq!(
            size,
            self.len(),
            "cannot reshape {:?} into {:?}",
            self.shape,
            shape
        );
        self.shape = shape;
        self
    }

    /// Row `i` of a tensor whose first dimension is the batch.
    pub fn row(&self, i: usize) -> &[f32] {
        let width: usize = self.shape.iter().skip(1).product();
        &self.data[i * width..(i + 1) * width]
    }

    /// Returns the indices of the maximum values along a dimension.
    ///
    /// # Arguments
    /// * `dim` - If None, returns the index of the global maximum as a scalar tensor.
    ///          If Some(d), returns the indices of maximum values along dimension d.
    ///
    /// # Examples
    /// ```
    /// use study_ml::ml::Tensor;
    ///
    /// let t = Tensor::new(vec![0.1, 0.9, 0.3, 0.7, 0.2, 0.1], vec![2, 3]);
    /// let idx = t.argmax(Some(1));
    /// assert_eq!(idx.as_f32_slice(), &[1.0, 0.0]);
    /// ```
    pub fn argmax(&self, dim: Option<usize>) -> Tensor {
        let data = self.as_f32_slice();

        match dim {
            None => {
                let mut max_idx = 0;
                let mut max_val = data[0];
                for (i, &val) in data.iter().enumerate().skip(1) {
                    if val > max_val {
                        max_val = val;
                        max_idx = i;
                    }
                }
                Tensor::new(vec![max_idx as f32], vec![1])
            }
            Some(d) => {
                assert!(
                    d < self.shape.len(),
                    "Dimension {} out of bounds for shape {:?}",
                    d,
                    self.shape
                );

                let outer: usize = self.shape[..d].iter().product();
                let dim_size = self.shape[d];
                let inner: usize = self.shape[d + 1..].iter().product();

                let mut out_shape = self.shape.clone();
                out_shape.remove(d);
                if out_shape.is_empty() {
                    out_shape.push(1);
                }

                let mut result = vec![0.0; outer * inner];
                for o in 0..outer {
                    for i in 0..inner {
                        let mut max_idx = 0;
                        let mut max_val = f32::NEG_INFINITY;
                        for j in 0..dim_size {
                            let val = data[(o * dim_size + j) * inner + i];
                            if val > max_val {
                                max_val = val;
                                max_idx = j;
                            }
                        }
                        result[o * inner + i] = max_idx as f32;
                    }
                }

                Tensor::new(result, out_shape)
            }
        }
    }
}

impl Add for Tensor {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for Tensor {
    fn add_assign(&mut self, rhs: Self) {
        *self += &rhs;
    }
}

impl AddAssign<&Tensor> for Tensor {
    fn add_assign(&mut self, rhs: &Tensor) {
        assert_eq!(
            self.len(),
            rhs.len(),
            "cannot add {:?} and {:?}",
            self.shape,
            rhs.shape
        );
        for (l, r) in self.data.iter_mut().zip(rhs.data.iter()) {
            *l += r;
        }
    }
}

/// Trait for neural network layers and operations.
///
/// Implementors define forward and backward passes for automatic differentiation.
/// `call` takes `&mut self` so layers such as batch normalisation can update
/// running statistics while training.
pub trait Node {
    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, output: &Tensor) -> Vec<Tensor>;
    fn call(&mut self, input: Vec<Tensor>) -> Tensor;
    fn no_grad(&self) -> bool {
        false
    }
    fn has_params(&self) -> bool {
        false
    }
    fn apply_update(&mut self, _update: Vec<Tensor>) {}
    fn load_param(&mut self, _file: PathBuf) -> Result<()> {
        Ok(())
    }
    fn save_param(&self, _file: PathBuf) -> Result<()> {
        Ok(())
    }
    /// Gradients accumulated since the last update, or `None` when the node
    /// did not take part in the last backward pass.
    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        None
    }
    fn param_count(&self) -> usize {
        0
    }
    fn prepare_inference(&mut self) {}
    fn prepare_train(&mut self) {}
}

/// Trait for optimization algorithms.
pub trait Optimizer {
    fn optimize(&mut self, tar_id: usize, grads: Vec<&Tensor>) -> Vec<Tensor>;
}

/// Placeholder node for graph inputs.
#[derive(Default)]
pub struct Placeholder {}

impl Node for Placeholder {
    fn backward(&mut self, _: &Tensor, _: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        vec![]
    }
    fn call(&mut self, _: Vec<Tensor>) -> Tensor {
        Tensor::null()
    }
    fn no_grad(&self) -> bool {
        true
    }
}

impl Placeholder {
    pub fn new() -> Self {
        Placeholder {}
    }
}

/// Computational graph for automatic differentiation.
///
/// Manages forward and backward passes through a network of nodes. Ids are
/// handed out in insertion order and a node can only consume existing ids,
/// so increasing id order is a topological order of the graph.
pub struct Graph {
    pub layers: Vec<Box<dyn Node>>,
    pub optimizer: Option<Box<dyn Optimizer>>,
    pub flows: Vec<Option<Tensor>>,
    pub backflows: Vec<Option<Tensor>>,
    placeholder: Option<Vec<usize>>,
    parameters: Vec<usize>,
    inputs: Vec<Vec<usize>>,
    pub target: usize,
    pub is_inference: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            layers: Vec::new(),
            flows: Vec::new(),
            optimizer: None,
            backflows: Vec::new(),
            parameters: Vec::new(),
            placeholder: None,
            inputs: Vec::new(),
            target: 0,
            is_inference: false,
        }
    }

    pub fn set_inference_mode(&mut self) {
        self.is_inference = true;
        for layer in self.layers.iter_mut() {
            layer.prepare_inference();
        }
    }

    pub fn set_train_mode(&mut self) {
        self.is_inference = false;
        for layer in self.layers.iter_mut() {
            layer.prepare_train();
        }
    }

    pub fn set_optimizer<O: Optimizer + 'static>(&mut self, optimizer: O) {
        self.optimizer = Some(Box::new(optimizer));
    }

    /// Ids reachable from the target, walking input edges.
    fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.layers.len()];
        let mut stack = vec![self.target];
        while let Some(id) = stack.pop() {
            if seen[id] {
                continue;
            }
            seen[id] = true;
            stack.extend(self.inputs[id].iter().copied());
        }
        seen
    }

    pub fn backward(&mut self) {
        let target_flow = self.flows[self.target]
            .as_ref()
            .expect("backward called before forward");
        self.backflows[self.target] = Some(Tensor::ones_like(target_flow));

        let reachable = self.reachable();

        // Every consumer of a node has a larger id, so by the time we reach a
        // node all of its downstream gradient has been accumulated.
        for tar in (0..=self.target).rev() {
            if !reachable[tar] || self.layers[tar].no_grad() {
                continue;
            }
            let Some(grad) = self.backflows[tar].take() else {
                continue;
            };

            let input_ids = self.inputs[tar].clone();
            let input_grads = {
                let input_vecs: Vec<&Tensor> = input_ids
                    .iter()
                    .map(|id| {
                        self.flows[*id]
                            .as_ref()
                            .expect("input flow missing during backward")
                    })
                    .collect();
                let output = self.flows[tar]
                    .as_ref()
                    .expect("output flow missing during backward");
                self.layers[tar].backward(&grad, input_vecs, output)
            };
            self.backflows[tar] = Some(grad);

            for (input_id, input_grad) in input_ids.into_iter().zip(input_grads) {
                match self.backflows[input_id].as_mut() {
                    Some(existing_grad) => *existing_grad += input_grad,
                    None => self.backflows[input_id] = Some(input_grad),
                }
            }
        }
    }

    pub fn forward(&mut self, input_vec: Vec<Tensor>) -> Tensor {
        let placeholder = self
            .placeholder
            .clone()
            .expect("set_placeholder must be called before forward");
        self.forward_(placeholder, input_vec)
    }

    pub fn forward_(&mut self, placeholder: Vec<usize>, input_vec: Vec<Tensor>) -> Tensor {
        assert_eq!(placeholder.len(), input_vec.len());
        for (id, input) in placeholder.into_iter().zip(input_vec) {
            self.flows[id] = Some(input);
        }

        let mut stack: Vec<usize> = vec![self.target];
        while let Some(tar) = stack.pop() {
            if self.flows[tar].is_some() {
                continue;
            }
            let pending: Vec<usize> = self.inputs[tar]
                .iter()
                .copied()
                .filter(|id| self.flows[*id].is_none())
                .collect();
            if !pending.is_empty() {
                stack.push(tar);
                stack.extend(pending);
                continue;
            }

            let inputs = self.inputs[tar]
                .iter()
                .map(|id| self.flows[*id].clone().unwrap_or_else(Tensor::null))
                .collect();
            let out = self.layers[tar].call(inputs);
            self.flows[tar] = Some(out);
        }

        self.flows[self.target].clone().unwrap_or_else(Tensor::null)
    }

    pub fn optimize(&mut self) {
        if let Some(optimizer) = self.optimizer.as_mut() {
            for &id in self.parameters.iter() {
                let Some(grads) = self.layers[id].pull_grad() else {
                    continue;
                };
                let update = optimizer.optimize(id, grads);
                self.layers[id].apply_update(update);
            }
        }
    }

    pub fn push_placeholder(&mut self) -> usize {
        self.add_layer(Vec::new(), Box::new(Placeholder::new()))
    }

    pub fn add_layer(&mut self, inputs: Vec<usize>, node: Box<dyn Node>) -> usize {
        let id = self.layers.len();
        for &i in inputs.iter() {
            assert!(i < id, "node {} consumes unknown node {}", id, i);
        }

        if node.has_params() {
            self.parameters.push(id);
        }
        self.layers.push(node);
        self.flows.push(None);
        self.backflows.push(None);
        self.inputs.push(inputs);

        id
    }

    /// Adds a parameter node with no inputs.
    pub fn add_parameter<N: Node + 'static>(&mut self, param: N) -> usize {
        self.add_layer(Vec::new(), Box::new(param))
    }

    pub fn reset(&mut self) {
        for i in 0..self.flows.len() {
            self.flows[i] = None;
            self.backflows[i] = None
        }
    }

    pub fn set_target(&mut self, id: usize) {
        self.target = id;
    }

    pub fn set_placeholder(&mut self, placeholder: Vec<usize>) {
        self.placeholder = Some(placeholder);
    }

    /// Number of trainable scalars in the graph.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.param_count()).sum()
    }

    /// Writes one `<id>.param` file per node into `dir`.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        for (i, layer) in self.layers.iter().enumerate() {
            layer.save_param(dir.join(format!("{}.param", i)))?;
        }
        Ok(())
    }

    /// Loads parameters written by [`Graph::save`] into an identically built graph.
    pub fn load<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();

        for (i, layer) in self.layers.iter_mut().enumerate() {
            if layer.has_params() {
                layer.load_param(dir.join(format!("{}.param", i)))?;
            }
        }
        Ok(())
    }
}
