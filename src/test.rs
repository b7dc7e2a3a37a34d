use crate::dataset::cifar::one_hot;
use crate::dataset::Stackable;
use crate::ml::conv::{BatchNorm2d, Conv2d};
use crate::ml::funcs::{CrossEntropyLoss, ReLU, Softmax, MSE};
use crate::ml::models::{DenseRegressor, ResNetConfig};
use crate::ml::ops::Add;
use crate::ml::optim::SGD;
use crate::ml::params::{Linear, Parameter};
use crate::ml::{self, Graph, Node, Tensor};

/// `loss(layer(x), y)` with both `x` and `y` fed through placeholders.
struct Probe {
    graph: Graph,
    input: usize,
}

impl Probe {
    fn new(layer: Box<dyn Node>, loss: Box<dyn Node>) -> Self {
        let mut graph = Graph::new();
        let input = graph.push_placeholder();
        let target = graph.push_placeholder();
        let out = graph.add_layer(vec![input], layer);
        let loss = graph.add_layer(vec![out, target], loss);
        graph.set_target(loss);
        graph.set_placeholder(vec![input, target]);
        Probe { graph, input }
    }

    fn with_mse(layer: Box<dyn Node>) -> Self {
        Self::new(layer, Box::new(MSE::new()))
    }

    fn loss(&mut self, x: &Tensor, y: &Tensor) -> f32 {
        self.graph.reset();
        let loss = self.graph.forward(vec![x.clone(), y.clone()]);
        self.graph.reset();
        loss.get_item().unwrap()
    }

    fn input_grad(&mut self, x: &Tensor, y: &Tensor) -> Tensor {
        self.graph.reset();
        self.graph.forward(vec![x.clone(), y.clone()]);
        self.graph.backward();
        let grad = self.graph.backflows[self.input].clone().unwrap();
        self.graph.reset();
        grad
    }

    /// Central differences on every input element.
    fn numeric_input_grad(&mut self, x: &Tensor, y: &Tensor, h: f32) -> Tensor {
        let mut grad = Tensor::zeros_like(x);
        for i in 0..x.len() {
            let mut plus = x.clone();
            plus.f32_data_mut()[i] += h;
            let mut minus = x.clone();
            minus.f32_data_mut()[i] -= h;
            grad.f32_data_mut()[i] = (self.loss(&plus, y) - self.loss(&minus, y)) / (2.0 * h);
        }
        grad
    }
}

fn assert_close(analytic: &Tensor, numeric: &Tensor, tol: f32, message: &str) {
    assert_eq!(analytic.shape, numeric.shape, "{}", message);
    for (i, (a, n)) in analytic
        .as_f32_slice()
        .iter()
        .zip(numeric.as_f32_slice())
        .enumerate()
    {
        assert!(
            (a - n).abs() <= tol * (1.0 + n.abs()),
            "{}: grad[{i}] analytic={a} numeric={n}",
            message
        );
    }
}

fn ramp(shape: Vec<usize>, scale: f32) -> Tensor {
    let n: usize = shape.iter().product();
    // deterministic, varied, no repeated values
    let data = (0..n)
        .map(|i| ((i * 7 + 3) % 11) as f32 * scale - 0.5 * 11.0 * scale + i as f32 * 0.01)
        .collect();
    Tensor::new(data, shape)
}

#[test]
fn test_linear_forward() {
    let w = Tensor::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], vec![2, 3]);
    let b = Tensor::new(vec![0.5, -1.0], vec![2]);
    let x = Tensor::new(vec![0.0, 1.0, 2.0], vec![1, 3]);

    let mut linear = Linear::new(w, b);
    let out = linear.call(vec![x]);

    assert_tensor(Tensor::new(vec![5.5, 13.0], vec![1, 2]), out, String::new());
}

#[test]
fn test_residual_gradients_accumulate() {
    // loss = mean((Wx + x)^2) with W = diag(2, 3)
    let mut graph = Graph::new();
    let input = graph.push_placeholder();
    let target = graph.push_placeholder();
    let w = Tensor::new(vec![2.0, 0.0, 0.0, 3.0], vec![2, 2]);
    let lin = graph.add_layer(vec![input], Box::new(Linear::new(w, Tensor::zeros(vec![2]))));
    let sum = graph.add_layer(vec![lin, input], Box::new(Add::new()));
    let loss = graph.add_layer(vec![sum, target], Box::new(MSE::new()));
    graph.set_target(loss);
    graph.set_placeholder(vec![input, target]);

    let out = graph.forward(vec![
        Tensor::new(vec![1.0, 1.0], vec![1, 2]),
        Tensor::zeros(vec![1, 2]),
    ]);
    assert_eq!(out.get_item(), Some((9.0 + 16.0) / 2.0));

    graph.backward();
    // d/dx0 = 3 * 3 * x0, d/dx1 = 4 * 4 * x1; both paths reach the input
    assert_tensor(
        Tensor::new(vec![9.0, 16.0], vec![1, 2]),
        graph.backflows[input].clone().unwrap(),
        "residual ".into(),
    );
    let w_grad = graph.layers[lin].pull_grad().unwrap();
    // dL/dW = dL/dsum * x^T = [3, 4]^T * [1, 1]
    assert_tensor(
        Tensor::new(vec![3.0, 3.0, 4.0, 4.0], vec![2, 2]),
        w_grad[0].clone(),
        "weight ".into(),
    );
}

#[test]
fn test_free_parameter_is_fitted() {
    // learn the offset p in x + p = y
    let mut graph = Graph::new();
    let input = graph.push_placeholder();
    let target = graph.push_placeholder();
    let offset = graph.add_parameter(Parameter::new(Tensor::zeros(vec![1, 2])));
    let sum = graph.add_layer(vec![input, offset], Box::new(Add::new()));
    let loss = graph.add_layer(vec![sum, target], Box::new(MSE::new()));
    graph.set_target(loss);
    graph.set_placeholder(vec![input, target]);
    graph.set_optimizer(SGD::new(0.25));
    assert_eq!(graph.parameter_count(), 2);

    let x = Tensor::new(vec![1.0, 2.0], vec![1, 2]);
    let y = Tensor::new(vec![1.5, 1.0], vec![1, 2]);
    for _ in 0..100 {
        graph.forward(vec![x.clone(), y.clone()]);
        graph.backward();
        graph.optimize();
        graph.reset();
    }
    graph.set_target(offset);
    let learned = graph.forward_(Vec::new(), Vec::new());
    assert_tensor(Tensor::new(vec![0.5, -1.0], vec![1, 2]), learned, "offset ".into());
}

#[test]
fn test_optimize_skips_unreached_parameters() {
    let mut graph = Graph::new();
    let input = graph.push_placeholder();
    let target = graph.push_placeholder();
    let used = graph.add_layer(vec![input], Box::new(Linear::auto(2, 1)));
    let unused = graph.add_layer(vec![input], Box::new(Linear::auto(2, 1)));
    let loss = graph.add_layer(vec![used, target], Box::new(MSE::new()));
    graph.set_target(loss);
    graph.set_placeholder(vec![input, target]);
    graph.set_optimizer(SGD::new(0.1));

    graph.forward(vec![Tensor::ones(vec![1, 2]), Tensor::zeros(vec![1, 1])]);
    graph.backward();
    assert!(graph.layers[used].pull_grad().is_some());
    assert!(graph.layers[unused].pull_grad().is_none());
    graph.optimize();
    graph.reset();
}

#[test]
fn test_linear_gradients_match_finite_differences() {
    crate::utills::rand::seed(1);
    let x = ramp(vec![3, 4], 0.2);
    let y = ramp(vec![3, 2], 0.1);
    let mut probe = Probe::with_mse(Box::new(Linear::auto(4, 2)));
    let analytic = probe.input_grad(&x, &y);
    let numeric = probe.numeric_input_grad(&x, &y, 1e-2);
    assert_close(&analytic, &numeric, 2e-3, "linear input");

    // weight gradient through a fresh layer per perturbation
    let w = ramp(vec![2, 4], 0.3);
    let b = Tensor::new(vec![0.1, -0.2], vec![2]);
    let loss_with = |w: Tensor| {
        Probe::with_mse(Box::new(Linear::new(w, b.clone()))).loss(&x, &y)
    };
    let mut probe = Probe::with_mse(Box::new(Linear::new(w.clone(), b.clone())));
    probe.input_grad(&x, &y);
    let analytic = probe.graph.layers[2].pull_grad().unwrap()[0].clone();

    let mut numeric = Tensor::zeros_like(&w);
    for i in 0..w.len() {
        let mut plus = w.clone();
        plus.f32_data_mut()[i] += 1e-2;
        let mut minus = w.clone();
        minus.f32_data_mut()[i] -= 1e-2;
        numeric.f32_data_mut()[i] = (loss_with(plus) - loss_with(minus)) / 2e-2;
    }
    assert_close(&analytic, &numeric, 2e-3, "linear weight");
}

#[test]
fn test_conv_gradients_match_finite_differences() {
    crate::utills::rand::seed(2);
    let x = ramp(vec![2, 2, 5, 5], 0.1);
    let y = ramp(vec![2, 3, 3, 3], 0.05);
    let mut probe = Probe::with_mse(Box::new(Conv2d::auto(2, 3, 3, 2, 1, true)));
    let analytic = probe.input_grad(&x, &y);
    let numeric = probe.numeric_input_grad(&x, &y, 1e-2);
    assert_close(&analytic, &numeric, 2e-3, "conv input");
}

#[test]
fn test_batchnorm_gradients_match_finite_differences() {
    let x = ramp(vec![3, 2, 2, 2], 0.4);
    let y = ramp(vec![3, 2, 2, 2], 0.3);
    let mut bn = BatchNorm2d::new(2);
    bn.gamma = Tensor::new(vec![1.5, 0.5], vec![2]);
    bn.beta = Tensor::new(vec![0.1, -0.3], vec![2]);
    let mut probe = Probe::with_mse(Box::new(bn));
    let analytic = probe.input_grad(&x, &y);
    let numeric = probe.numeric_input_grad(&x, &y, 1e-2);
    assert_close(&analytic, &numeric, 5e-3, "batchnorm input");
}

#[test]
fn test_softmax_gradients_match_finite_differences() {
    let x = ramp(vec![2, 4], 0.5);
    let y = Tensor::new(vec![0.0, 1.0, 0.0, 0.0, 0.25, 0.25, 0.25, 0.25], vec![2, 4]);
    let mut probe = Probe::with_mse(Box::new(Softmax::new()));
    let analytic = probe.input_grad(&x, &y);
    let numeric = probe.numeric_input_grad(&x, &y, 1e-2);
    assert_close(&analytic, &numeric, 2e-3, "softmax input");
}

#[test]
fn test_cross_entropy_gradients_match_finite_differences() {
    let x = ramp(vec![3, 4], 0.5);
    let y = Tensor::new(
        vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        vec![3, 4],
    );
    // the ReLU passes positive logits through and zeroes the rest
    let mut probe = Probe::new(Box::new(ReLU::new()), Box::new(CrossEntropyLoss::new()));
    let x_pos = Tensor::new(x.as_f32_slice().iter().map(|v| v.abs() + 0.1).collect(), x.shape.clone());
    let analytic = probe.input_grad(&x_pos, &y);
    let numeric = probe.numeric_input_grad(&x_pos, &y, 1e-2);
    assert_close(&analytic, &numeric, 2e-3, "cross entropy input");
}

#[test]
fn test_dense_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = DenseRegressor {
        input_dim: 3,
        hidden: 6,
        depth: 2,
    };
    crate::utills::rand::seed(10);
    let mut trained = config.build();
    crate::utills::rand::seed(11);
    let mut fresh = config.build();

    let x = ramp(vec![4, 3], 0.3);
    let expected = trained.predict(x.clone());
    trained.save(dir.path()).unwrap();
    fresh.load(dir.path()).unwrap();
    assert_tensor(expected, fresh.predict(x), "reloaded ".into());
}

#[test]
fn test_resnet_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = ResNetConfig {
        image_size: 8,
        stem_channels: 2,
        stages: vec![(2, 1, 1), (4, 1, 2)],
        ..ResNetConfig::default()
    };
    crate::utills::rand::seed(20);
    let mut trained = config.build();
    let x = ramp(vec![2, 3, 8, 8], 0.1);
    // one training step moves the batch-norm running statistics
    let y = Tensor::stack(vec![one_hot(3, 10), one_hot(5, 10)]);
    trained.train_step(x.clone(), y);
    let expected = trained.predict(x.clone());
    trained.save(dir.path()).unwrap();

    crate::utills::rand::seed(21);
    let mut fresh = config.build();
    fresh.load(dir.path()).unwrap();
    assert_tensor(expected, fresh.predict(x), "reloaded resnet ".into());
}

#[test]
fn test_load_rejects_other_architecture() {
    let dir = tempfile::tempdir().unwrap();
    DenseRegressor {
        input_dim: 3,
        hidden: 6,
        depth: 1,
    }
    .build()
    .save(dir.path())
    .unwrap();

    let mut wider = DenseRegressor {
        input_dim: 3,
        hidden: 7,
        depth: 1,
    }
    .build();
    assert!(wider.load(dir.path()).is_err());
}

#[test]
fn test_argmax_rows() {
    let t = Tensor::new(vec![0.1, 0.7, 0.2, 0.9, 0.05, 0.05], vec![2, 3]);
    assert_eq!(t.argmax(Some(1)).as_f32_slice(), &[1.0, 0.0]);
    assert_eq!(ml::metrics::accuracy(&t, &Tensor::new(vec![1.0, 2.0], vec![2])), 0.5);
}

#[test]
fn test_row_width_ignores_batch() {
    let t = Tensor::new((0..12).map(|v| v as f32).collect(), vec![2, 3, 2]);
    assert_eq!(t.row(1), &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);

    let thin = Tensor::zeros(vec![2, 0]);
    assert!(thin.row(1).is_empty());
}

fn assert_tensor(a: Tensor, b: Tensor, message: String) {
    assert_eq!(
        a.shape.len(),
        b.shape.len(),
        "{}[assert_tensor] shape dimension num is not same, a.shape.len()={}, b.shape.len()={}",
        message,
        a.shape.len(),
        b.shape.len()
    );
    for (i, (a_i, b_i)) in a.shape.iter().zip(b.shape.iter()).enumerate() {
        assert_eq!(
            a_i, b_i,
            "{}[assert_tensor] shape size is not same a.shape[{i}]={a_i}, b.shape[{i}]={b_i}",
            message
        );
    }

    let a_f32 = a.as_f32_slice();
    let b_f32 = b.as_f32_slice();
    for (i, (a_i, b_i)) in a_f32.iter().zip(b_f32.iter()).enumerate() {
        assert!(
            (a_i - b_i).abs() < 1e-5,
            "{}[assert_tensor] data is not same a.data[{i}]={a_i}, b.data[{i}]={b_i}",
            message
        );
    }
}
