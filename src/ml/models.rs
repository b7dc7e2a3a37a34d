use std::path::Path;

use super::conv::{AvgPool2d, BatchNorm2d, Conv2d, Flatten};
use super::funcs::{CrossEntropyLoss, ReLU, MAE, MSE};
use super::ops::Add;
use super::params::Linear;
use super::{Graph, Optimizer, Result, Tensor};

/// Loss, and the optional metric node, of one forward pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub loss: f32,
    pub metric: Option<f32>,
}

/// A graph together with the node ids a training loop needs.
///
/// `input` and `target` are placeholders, `output` is the prediction and
/// `loss` consumes `output` and `target`. `metric` is an extra scalar node on
/// the same inputs, reported but never differentiated.
pub struct Network {
    pub graph: Graph,
    pub input: usize,
    pub target: usize,
    pub output: usize,
    pub loss: usize,
    pub metric: Option<usize>,
}

impl Network {
    pub fn new(graph: Graph, input: usize, target: usize, output: usize, loss: usize) -> Self {
        Network {
            graph,
            input,
            target,
            output,
            loss,
            metric: None,
        }
    }

    pub fn with_metric(mut self, metric: usize) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn set_optimizer<O: Optimizer + 'static>(&mut self, optimizer: O) {
        self.graph.set_optimizer(optimizer);
    }

    fn train_mode(&mut self) {
        if self.graph.is_inference {
            self.graph.set_train_mode();
        }
    }

    fn inference_mode(&mut self) {
        if !self.graph.is_inference {
            self.graph.set_inference_mode();
        }
    }

    /// Loss and metric for `(x, y)` with the flows left in place.
    fn forward_loss(&mut self, x: Tensor, y: Tensor) -> Step {
        self.graph.reset();
        self.graph.set_target(self.loss);
        self.graph.set_placeholder(vec![self.input, self.target]);
        let loss = self.graph.forward(vec![x, y]).get_item().unwrap_or(f32::NAN);

        // the metric reuses the cached output
        let metric = self.metric.and_then(|id| {
            self.graph.set_target(id);
            let value = self.graph.forward_(Vec::new(), Vec::new()).get_item();
            self.graph.set_target(self.loss);
            value
        });
        Step { loss, metric }
    }

    /// One optimisation step on a batch.
    pub fn train_step(&mut self, x: Tensor, y: Tensor) -> Step {
        self.train_mode();
        let step = self.forward_loss(x, y);
        self.graph.backward();
        self.graph.optimize();
        self.graph.reset();
        step
    }

    /// Loss and metric in inference mode, without touching the parameters.
    pub fn evaluate(&mut self, x: Tensor, y: Tensor) -> Step {
        self.inference_mode();
        let step = self.forward_loss(x, y);
        self.graph.reset();
        step
    }

    /// [`Network::evaluate`] plus the prediction computed on the way.
    pub fn evaluate_with_output(&mut self, x: Tensor, y: Tensor) -> (Step, Tensor) {
        self.inference_mode();
        let step = self.forward_loss(x, y);
        let output = self.graph.flows[self.output]
            .take()
            .unwrap_or_else(Tensor::null);
        self.graph.reset();
        (step, output)
    }

    pub fn evaluate_loss(&mut self, x: Tensor, y: Tensor) -> f32 {
        self.evaluate(x, y).loss
    }

    pub fn predict(&mut self, x: Tensor) -> Tensor {
        self.inference_mode();
        self.graph.reset();
        self.graph.set_target(self.output);
        self.graph.set_placeholder(vec![self.input]);
        let out = self.graph.forward(vec![x]);
        self.graph.reset();
        self.graph.set_target(self.loss);
        out
    }

    pub fn parameter_count(&self) -> usize {
        self.graph.parameter_count()
    }

    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        self.graph.save(dir)
    }

    pub fn load<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        self.graph.load(dir)
    }
}

/// Stack of ReLU dense layers ending in a single ReLU unit, trained with MSE
/// and reporting MAE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseRegressor {
    pub input_dim: usize,
    pub hidden: usize,
    pub depth: usize,
}

impl Default for DenseRegressor {
    fn default() -> Self {
        DenseRegressor {
            input_dim: 10,
            hidden: 120,
            depth: 8,
        }
    }
}

impl DenseRegressor {
    pub fn build(&self) -> Network {
        let mut graph = Graph::new();
        let input = graph.push_placeholder();
        let target = graph.push_placeholder();

        let mut last = input;
        let mut width = self.input_dim;
        for _ in 0..self.depth {
            last = crate::sequential!(graph, last, [Linear::auto(width, self.hidden), ReLU::new()]);
            width = self.hidden;
        }
        let output = crate::sequential!(graph, last, [Linear::auto(width, 1), ReLU::new()]);

        let loss = graph.add_layer(vec![output, target], Box::new(MSE::new()));
        let mae = graph.add_layer(vec![output, target], Box::new(MAE::new()));
        graph.set_target(loss);

        Network::new(graph, input, target, output, loss).with_metric(mae)
    }
}

/// Residual block: two 3x3 convolutions with batch norm, plus a shortcut that
/// is the identity, or a strided 1x1 projection when the shape changes.
/// Returns the id of the block output.
pub fn basic_block(
    graph: &mut Graph,
    input: usize,
    in_planes: usize,
    planes: usize,
    stride: usize,
) -> usize {
    let main = crate::sequential!(*graph, input, [
        Conv2d::auto(in_planes, planes, 3, stride, 1, false),
        BatchNorm2d::new(planes),
        ReLU::new(),
        Conv2d::auto(planes, planes, 3, 1, 1, false),
        BatchNorm2d::new(planes),
    ]);

    let shortcut = if stride != 1 || in_planes != planes {
        crate::sequential!(*graph, input, [
            Conv2d::auto(in_planes, planes, 1, stride, 0, false),
            BatchNorm2d::new(planes),
        ])
    } else {
        input
    };

    let sum = graph.add_layer(vec![main, shortcut], Box::new(Add::new()));
    graph.add_layer(vec![sum], Box::new(ReLU::new()))
}

/// One stage of residual blocks: `(planes, blocks, stride)`; only the first
/// block of a stage is strided.
pub type Stage = (usize, usize, usize);

/// Small CIFAR-style ResNet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResNetConfig {
    pub num_classes: usize,
    pub in_channels: usize,
    pub image_size: usize,
    pub stem_channels: usize,
    pub stages: Vec<Stage>,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        ResNetConfig {
            num_classes: 10,
            in_channels: 3,
            image_size: 32,
            stem_channels: 16,
            stages: vec![(16, 2, 1), (32, 2, 2), (64, 2, 2)],
        }
    }
}

impl ResNetConfig {
    /// Side length of the feature map after the last stage.
    pub fn final_size(&self) -> usize {
        self.stages
            .iter()
            .fold(self.image_size, |size, &(_, _, stride)| size.div_ceil(stride))
    }

    pub fn build(&self) -> Network {
        let mut graph = Graph::new();
        let input = graph.push_placeholder();
        let target = graph.push_placeholder();

        let mut last = crate::sequential!(graph, input, [
            Conv2d::auto(self.in_channels, self.stem_channels, 3, 1, 1, false),
            BatchNorm2d::new(self.stem_channels),
            ReLU::new(),
        ]);

        let mut in_planes = self.stem_channels;
        for &(planes, blocks, stride) in &self.stages {
            for b in 0..blocks {
                let s = if b == 0 { stride } else { 1 };
                last = basic_block(&mut graph, last, in_planes, planes, s);
                in_planes = planes;
            }
        }

        let output = crate::sequential!(graph, last, [
            AvgPool2d::new(self.final_size()),
            Flatten::new(),
            Linear::auto(in_planes, self.num_classes),
        ]);
        let loss = graph.add_layer(vec![output, target], Box::new(CrossEntropyLoss::new()));
        graph.set_target(loss);

        Network::new(graph, input, target, output, loss)
    }
}

/// Stops training once the monitored loss has not improved by more than
/// `min_delta` for `patience` consecutive epochs.
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f32,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f32) -> Self {
        EarlyStopping {
            patience,
            min_delta,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    /// Records one epoch; returns true when training should stop.
    pub fn update(&mut self, loss: f32) -> bool {
        if loss < self.best - self.min_delta {
            self.best = loss;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best(&self) -> f32 {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::optim::Adam;

    #[test]
    fn dense_regressor_shapes_and_size() {
        let mut net = DenseRegressor::default().build();
        // 10*120+120 + 7*(120*120+120) + 120+1
        assert_eq!(net.parameter_count(), 1320 + 7 * 14520 + 121);

        let pred = net.predict(Tensor::zeros(vec![4, 10]));
        assert_eq!(pred.shape, vec![4, 1]);
        assert!(pred.as_f32_slice().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn dense_regressor_reports_mae() {
        let mut net = DenseRegressor {
            input_dim: 2,
            hidden: 4,
            depth: 1,
        }
        .build();
        let step = net.evaluate(Tensor::zeros(vec![3, 2]), Tensor::new(vec![1.0, 2.0, 3.0], vec![3, 1]));
        // zero input with zero biases predicts zero everywhere
        assert!((step.loss - 14.0 / 3.0).abs() < 1e-5);
        assert_eq!(step.metric, Some(2.0));
    }

    #[test]
    fn evaluate_with_output_matches_predict() {
        crate::utills::rand::seed(3);
        let mut net = DenseRegressor {
            input_dim: 3,
            hidden: 5,
            depth: 2,
        }
        .build();
        let x = Tensor::new(vec![0.1, 0.5, 0.9, 0.3, 0.2, 0.7], vec![2, 3]);
        let y = Tensor::new(vec![1.0, 0.0], vec![2, 1]);
        let (step, out) = net.evaluate_with_output(x.clone(), y.clone());
        assert_eq!(out, net.predict(x.clone()));
        assert_eq!(step, net.evaluate(x, y));
    }

    #[test]
    fn train_step_lowers_loss() {
        crate::utills::rand::seed(5);
        let mut graph = Graph::new();
        let input = graph.push_placeholder();
        let target = graph.push_placeholder();
        let output = graph.add_layer(vec![input], Box::new(Linear::auto(2, 1)));
        let loss = graph.add_layer(vec![output, target], Box::new(MSE::new()));
        graph.set_target(loss);
        let mut net = Network::new(graph, input, target, output, loss);
        net.set_optimizer(Adam::with_lr(0.05));

        // y = 2a - b + 1
        let x = Tensor::new(vec![0.1, 0.2, 0.5, 0.4, 0.9, 0.7, 0.3, 0.8], vec![4, 2]);
        let y = Tensor::new(vec![1.0, 1.6, 2.1, 0.8], vec![4, 1]);
        let before = net.evaluate_loss(x.clone(), y.clone());
        for _ in 0..500 {
            net.train_step(x.clone(), y.clone());
        }
        let after = net.evaluate_loss(x, y);
        assert!(after < before * 0.1, "loss {} -> {}", before, after);
    }

    #[test]
    fn resnet_forward_shape() {
        let cfg = ResNetConfig {
            image_size: 8,
            stages: vec![(4, 1, 1), (8, 1, 2)],
            stem_channels: 4,
            ..ResNetConfig::default()
        };
        assert_eq!(cfg.final_size(), 4);
        let mut net = cfg.build();
        let out = net.predict(Tensor::zeros(vec![2, 3, 8, 8]));
        assert_eq!(out.shape, vec![2, 10]);
    }

    #[test]
    fn default_resnet_pools_over_eight() {
        assert_eq!(ResNetConfig::default().final_size(), 8);
    }

    #[test]
    fn early_stopping_waits_for_patience() {
        let mut es = EarlyStopping::new(2, 0.0);
        assert!(!es.update(1.0));
        assert!(!es.update(0.9));
        assert!(!es.update(0.95));
        assert!(es.update(0.92));
        assert_eq!(es.best(), 0.9);
    }
}
