use std::path::PathBuf;

use rayon::prelude::*;

use super::binary_io::{load_tensors, save_tensors, TYPE_BATCHNORM2D, TYPE_CONV2D};
use super::he_vec;
use super::{Node, Result, Tensor};

/// Spatial geometry of one convolution: input `[c, h, w]`, square kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ConvGeometry {
    channels: usize,
    height: usize,
    width: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    out_height: usize,
    out_width: usize,
}

impl ConvGeometry {
    fn new(input_shape: &[usize], kernel: usize, stride: usize, padding: usize) -> Self {
        assert_eq!(
            input_shape.len(),
            4,
            "convolution expects [N, C, H, W], got {:?}",
            input_shape
        );
        let (channels, height, width) = (input_shape[1], input_shape[2], input_shape[3]);
        assert!(
            height + 2 * padding >= kernel && width + 2 * padding >= kernel,
            "kernel {} larger than padded input {:?}",
            kernel,
            input_shape
        );
        ConvGeometry {
            channels,
            height,
            width,
            kernel,
            stride,
            padding,
            out_height: (height + 2 * padding - kernel) / stride + 1,
            out_width: (width + 2 * padding - kernel) / stride + 1,
        }
    }

    /// Rows of the column matrix: `c * k * k`.
    fn patch_len(&self) -> usize {
        self.channels * self.kernel * self.kernel
    }

    /// Columns of the column matrix: one per output pixel.
    fn positions(&self) -> usize {
        self.out_height * self.out_width
    }

    fn sample_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Source index in the sample for column-matrix entry `(r, p)`, or `None`
    /// when it falls into the padding.
    #[inline]
    fn source(&self, c: usize, ki: usize, kj: usize, oy: usize, ox: usize) -> Option<usize> {
        let y = (oy * self.stride + ki) as isize - self.padding as isize;
        let x = (ox * self.stride + kj) as isize - self.padding as isize;
        if y < 0 || x < 0 || y >= self.height as isize || x >= self.width as isize {
            return None;
        }
        Some((c * self.height + y as usize) * self.width + x as usize)
    }

    fn im2col(&self, sample: &[f32]) -> Vec<f32> {
        let positions = self.positions();
        let mut cols = vec![0.0; self.patch_len() * positions];
        for c in 0..self.channels {
            for ki in 0..self.kernel {
                for kj in 0..self.kernel {
                    let r = (c * self.kernel + ki) * self.kernel + kj;
                    let row = &mut cols[r * positions..(r + 1) * positions];
                    for oy in 0..self.out_height {
                        for ox in 0..self.out_width {
                            if let Some(src) = self.source(c, ki, kj, oy, ox) {
                                row[oy * self.out_width + ox] = sample[src];
                            }
                        }
                    }
                }
            }
        }
        cols
    }

    /// Scatter-adds a column-matrix gradient back onto the sample.
    fn col2im(&self, cols: &[f32], sample_grad: &mut [f32]) {
        let positions = self.positions();
        for c in 0..self.channels {
            for ki in 0..self.kernel {
                for kj in 0..self.kernel {
                    let r = (c * self.kernel + ki) * self.kernel + kj;
                    let row = &cols[r * positions..(r + 1) * positions];
                    for oy in 0..self.out_height {
                        for ox in 0..self.out_width {
                            if let Some(dst) = self.source(c, ki, kj, oy, ox) {
                                sample_grad[dst] += row[oy * self.out_width + ox];
                            }
                        }
                    }
                }
            }
        }
    }
}

/// 2D convolution over `[N, C, H, W]` with a square kernel.
///
/// Each sample is unfolded with im2col and multiplied by the `[out, c*k*k]`
/// weight matrix; samples run in parallel.
pub struct Conv2d {
    pub w: Tensor,
    pub b: Option<Tensor>,
    pub stride: usize,
    pub padding: usize,
    pub w_grad: Option<Tensor>,
    pub b_grad: Option<Tensor>,
}

impl Conv2d {
    /// `w` has shape `[out_channels, in_channels, k, k]`.
    pub fn new(w: Tensor, b: Option<Tensor>, stride: usize, padding: usize) -> Self {
        assert_eq!(w.shape.len(), 4, "conv weight must be [out, in, k, k]");
        assert_eq!(w.shape[2], w.shape[3], "only square kernels are supported");
        assert!(stride > 0);
        if let Some(b) = b.as_ref() {
            assert_eq!(b.shape, vec![w.shape[0]]);
        }
        Self {
            w,
            b,
            stride,
            padding,
            w_grad: None,
            b_grad: None,
        }
    }

    /// He-initialised convolution.
    pub fn auto(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        bias: bool,
    ) -> Self {
        let fan_in = in_channels * kernel * kernel;
        let w = Tensor::new(
            he_vec(fan_in, out_channels * fan_in),
            vec![out_channels, in_channels, kernel, kernel],
        );
        let b = bias.then(|| Tensor::zeros(vec![out_channels]));
        Conv2d::new(w, b, stride, padding)
    }

    pub fn out_channels(&self) -> usize {
        self.w.shape[0]
    }

    pub fn kernel(&self) -> usize {
        self.w.shape[2]
    }

    fn geometry(&self, input: &Tensor) -> ConvGeometry {
        let geo = ConvGeometry::new(&input.shape, self.kernel(), self.stride, self.padding);
        assert_eq!(
            geo.channels, self.w.shape[1],
            "Conv2d expects {} input channels, got shape {:?}",
            self.w.shape[1], input.shape
        );
        geo
    }
}

impl Node for Conv2d {
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let input = &input[0];
        let geo = self.geometry(input);
        let batch = input.shape[0];
        let out_c = self.out_channels();
        let positions = geo.positions();
        let patch = geo.patch_len();

        let w = self.w.as_f32_slice();
        let b = self.b.as_ref().map(|b| b.as_f32_slice());
        let mut out = vec![0.0; batch * out_c * positions];

        out.par_chunks_mut(out_c * positions)
            .zip(input.as_f32_slice().par_chunks(geo.sample_len()))
            .for_each(|(out_n, x_n)| {
                let cols = geo.im2col(x_n);
                for oc in 0..out_c {
                    let out_row = &mut out_n[oc * positions..(oc + 1) * positions];
                    if let Some(b) = b {
                        out_row.iter_mut().for_each(|v| *v = b[oc]);
                    }
                    for r in 0..patch {
                        let wv = w[oc * patch + r];
                        if wv == 0.0 {
                            continue;
                        }
                        let col_row = &cols[r * positions..(r + 1) * positions];
                        for (o, c) in out_row.iter_mut().zip(col_row) {
                            *o += wv * c;
                        }
                    }
                }
            });

        Tensor::new(out, vec![batch, out_c, geo.out_height, geo.out_width])
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let input = inputs[0];
        let geo = self.geometry(input);
        let out_c = self.out_channels();
        let positions = geo.positions();
        let patch = geo.patch_len();
        let w = self.w.as_f32_slice();

        let mut input_grad = Tensor::zeros_like(input);

        let (w_grad, b_grad) = input_grad
            .f32_data_mut()
            .par_chunks_mut(geo.sample_len())
            .zip(input.as_f32_slice().par_chunks(geo.sample_len()))
            .zip(grad.as_f32_slice().par_chunks(out_c * positions))
            .map(|((dx_n, x_n), g_n)| {
                let cols = geo.im2col(x_n);
                let mut dcols = vec![0.0; patch * positions];
                let mut dw = vec![0.0; out_c * patch];
                let mut db = vec![0.0; out_c];

                for oc in 0..out_c {
                    let g_row = &g_n[oc * positions..(oc + 1) * positions];
                    db[oc] = g_row.iter().sum();
                    for r in 0..patch {
                        let col_row = &cols[r * positions..(r + 1) * positions];
                        dw[oc * patch + r] = g_row.iter().zip(col_row).map(|(g, c)| g * c).sum();

                        let wv = w[oc * patch + r];
                        if wv == 0.0 {
                            continue;
                        }
                        let dcol_row = &mut dcols[r * positions..(r + 1) * positions];
                        for (d, g) in dcol_row.iter_mut().zip(g_row) {
                            *d += wv * g;
                        }
                    }
                }

                geo.col2im(&dcols, dx_n);
                (dw, db)
            })
            .reduce(
                || (vec![0.0; out_c * patch], vec![0.0; out_c]),
                |(mut dw_a, mut db_a), (dw_b, db_b)| {
                    dw_a.iter_mut().zip(&dw_b).for_each(|(a, b)| *a += b);
                    db_a.iter_mut().zip(&db_b).for_each(|(a, b)| *a += b);
                    (dw_a, db_a)
                },
            );

        let w_grad = Tensor::new(w_grad, self.w.shape.clone());
        match self.w_grad.as_mut() {
            Some(acc) => *acc += w_grad,
            None => self.w_grad = Some(w_grad),
        }
        if self.b.is_some() {
            let b_grad = Tensor::new(b_grad, vec![out_c]);
            match self.b_grad.as_mut() {
                Some(acc) => *acc += b_grad,
                None => self.b_grad = Some(b_grad),
            }
        }

        vec![input_grad]
    }

    fn has_params(&self) -> bool {
        true
    }

    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        let mut grads = vec![self.w_grad.as_ref()?];
        if self.b.is_some() {
            grads.push(self.b_grad.as_ref()?);
        }
        Some(grads)
    }

    fn param_count(&self) -> usize {
        self.w.len() + self.b.as_ref().map_or(0, |b| b.len())
    }

    fn apply_update(&mut self, update: Vec<Tensor>) {
        let mut update = update.into_iter();
        if let Some(dw) = update.next() {
            self.w += dw;
        }
        if let (Some(b), Some(db)) = (self.b.as_mut(), update.next()) {
            *b += db;
        }
        self.w_grad = None;
        self.b_grad = None;
    }

    fn save_param(&self, path: PathBuf) -> Result<()> {
        match self.b.as_ref() {
            Some(b) => save_tensors(&path, TYPE_CONV2D, &[&self.w, b]),
            None => save_tensors(&path, TYPE_CONV2D, &[&self.w]),
        }
    }

    fn load_param(&mut self, path: PathBuf) -> Result<()> {
        let mut expected = vec![self.w.shape.as_slice()];
        if let Some(b) = self.b.as_ref() {
            expected.push(b.shape.as_slice());
        }
        let mut tensors = load_tensors(&path, TYPE_CONV2D, &expected)?.into_iter();
        if let Some(w) = tensors.next() {
            self.w = w;
        }
        if let Some(b) = tensors.next() {
            self.b = Some(b);
        }
        Ok(())
    }
}

/// Values cached by the forward pass for the backward pass.
struct BatchNormCache {
    xhat: Vec<f32>,
    inv_std: Vec<f32>,
    /// Whether the batch statistics were used (training) or the running ones.
    batch_stats: bool,
}

/// Batch normalisation over the channel axis of `[N, C, H, W]`.
///
/// Training mode normalises with the biased batch variance and folds the
/// unbiased one into the running estimate; inference mode uses the running
/// estimates only.
pub struct BatchNorm2d {
    pub gamma: Tensor,
    pub beta: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
    pub momentum: f32,
    pub eps: f32,
    pub gamma_grad: Option<Tensor>,
    pub beta_grad: Option<Tensor>,
    is_inference: bool,
    cache: Option<BatchNormCache>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Self {
        BatchNorm2d {
            gamma: Tensor::ones(vec![channels]),
            beta: Tensor::zeros(vec![channels]),
            running_mean: Tensor::zeros(vec![channels]),
            running_var: Tensor::ones(vec![channels]),
            momentum: 0.1,
            eps: 1e-5,
            gamma_grad: None,
            beta_grad: None,
            is_inference: false,
            cache: None,
        }
    }

    pub fn channels(&self) -> usize {
        self.gamma.len()
    }
}

impl Node for BatchNorm2d {
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let input = &input[0];
        assert_eq!(input.shape.len(), 4, "BatchNorm2d expects [N, C, H, W]");
        let (batch, channels) = (input.shape[0], input.shape[1]);
        assert_eq!(
            channels,
            self.channels(),
            "BatchNorm2d has {} channels, input {:?}",
            self.channels(),
            input.shape
        );
        let hw = input.shape[2] * input.shape[3];
        let m = (batch * hw) as f32;
        let x = input.as_f32_slice();

        let mut mean = vec![0.0f32; channels];
        let mut var = vec![0.0f32; channels];
        let batch_stats = !self.is_inference;

        if batch_stats {
            for n in 0..batch {
                for c in 0..channels {
                    let base = (n * channels + c) * hw;
                    mean[c] += x[base..base + hw].iter().sum::<f32>();
                }
            }
            mean.iter_mut().for_each(|v| *v /= m);
            for n in 0..batch {
                for c in 0..channels {
                    let base = (n * channels + c) * hw;
                    var[c] += x[base..base + hw]
                        .iter()
                        .map(|v| (v - mean[c]).powi(2))
                        .sum::<f32>();
                }
            }
            var.iter_mut().for_each(|v| *v /= m);

            let unbias = if m > 1.0 { m / (m - 1.0) } else { 1.0 };
            let rm = self.running_mean.f32_data_mut();
            for c in 0..channels {
                rm[c] = (1.0 - self.momentum) * rm[c] + self.momentum * mean[c];
            }
            let rv = self.running_var.f32_data_mut();
            for c in 0..channels {
                rv[c] = (1.0 - self.momentum) * rv[c] + self.momentum * var[c] * unbias;
            }
        } else {
            mean.copy_from_slice(self.running_mean.as_f32_slice());
            var.copy_from_slice(self.running_var.as_f32_slice());
        }

        let inv_std: Vec<f32> = var.iter().map(|v| 1.0 / (v + self.eps).sqrt()).collect();
        let gamma = self.gamma.as_f32_slice();
        let beta = self.beta.as_f32_slice();

        let mut xhat = vec![0.0; x.len()];
        let mut out = vec![0.0; x.len()];
        for n in 0..batch {
            for c in 0..channels {
                let base = (n * channels + c) * hw;
                for i in base..base + hw {
                    xhat[i] = (x[i] - mean[c]) * inv_std[c];
                    out[i] = gamma[c] * xhat[i] + beta[c];
                }
            }
        }

        self.cache = Some(BatchNormCache {
            xhat,
            inv_std,
            batch_stats,
        });
        Tensor::new(out, input.shape.clone())
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let input = inputs[0];
        let (batch, channels) = (input.shape[0], input.shape[1]);
        let hw = input.shape[2] * input.shape[3];
        let m = (batch * hw) as f32;
        let g = grad.as_f32_slice();
        let gamma = self.gamma.as_f32_slice();

        let mut input_grad = Tensor::zeros_like(input);
        let Some(cache) = self.cache.as_ref() else {
            return vec![input_grad];
        };

        let mut dgamma = vec![0.0f32; channels];
        let mut dbeta = vec![0.0f32; channels];
        for n in 0..batch {
            for c in 0..channels {
                let base = (n * channels + c) * hw;
                for i in base..base + hw {
                    dgamma[c] += g[i] * cache.xhat[i];
                    dbeta[c] += g[i];
                }
            }
        }

        let dx = input_grad.f32_data_mut();
        if cache.batch_stats {
            // dxhat = g * gamma, so the sums over dxhat are gamma * dbeta and gamma * dgamma
            for n in 0..batch {
                for c in 0..channels {
                    let base = (n * channels + c) * hw;
                    let sum_dxhat = gamma[c] * dbeta[c];
                    let sum_dxhat_xhat = gamma[c] * dgamma[c];
                    let k = cache.inv_std[c] / m;
                    for i in base..base + hw {
                        let dxhat = g[i] * gamma[c];
                        dx[i] = k * (m * dxhat - sum_dxhat - cache.xhat[i] * sum_dxhat_xhat);
                    }
                }
            }
        } else {
            for n in 0..batch {
                for c in 0..channels {
                    let base = (n * channels + c) * hw;
                    for i in base..base + hw {
                        dx[i] = g[i] * gamma[c] * cache.inv_std[c];
                    }
                }
            }
        }

        let dgamma = Tensor::new(dgamma, vec![channels]);
        let dbeta = Tensor::new(dbeta, vec![channels]);
        match self.gamma_grad.as_mut() {
            Some(acc) => *acc += dgamma,
            None => self.gamma_grad = Some(dgamma),
        }
        match self.beta_grad.as_mut() {
            Some(acc) => *acc += dbeta,
            None => self.beta_grad = Some(dbeta),
        }

        vec![input_grad]
    }

    fn has_params(&self) -> bool {
        true
    }

    fn pull_grad(&self) -> Option<Vec<&Tensor>> {
        Some(vec![self.gamma_grad.as_ref()?, self.beta_grad.as_ref()?])
    }

    fn param_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    fn apply_update(&mut self, update: Vec<Tensor>) {
        self.gamma += &update[0];
        self.beta += &update[1];
        self.gamma_grad = None;
        self.beta_grad = None;
    }

    fn save_param(&self, path: PathBuf) -> Result<()> {
        save_tensors(
            &path,
            TYPE_BATCHNORM2D,
            &[&self.gamma, &self.beta, &self.running_mean, &self.running_var],
        )
    }

    fn load_param(&mut self, path: PathBuf) -> Result<()> {
        let channels = [self.channels()];
        let shape: &[usize] = &channels;
        let loaded = load_tensors(&path, TYPE_BATCHNORM2D, &[shape, shape, shape, shape])?;
        let [gamma, beta, mean, var] = <[Tensor; 4]>::try_from(loaded).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "batchnorm file incomplete")
        })?;
        self.gamma = gamma;
        self.beta = beta;
        self.running_mean = mean;
        self.running_var = var;
        Ok(())
    }

    fn prepare_inference(&mut self) {
        self.is_inference = true;
    }

    fn prepare_train(&mut self) {
        self.is_inference = false;
    }
}

/// Non-overlapping average pooling: kernel and stride are both `k`.
/// Trailing rows and columns that do not fill a window are dropped.
pub struct AvgPool2d {
    kernel: usize,
}

impl AvgPool2d {
    pub fn new(kernel: usize) -> Self {
        assert!(kernel > 0);
        AvgPool2d { kernel }
    }
}

impl Node for AvgPool2d {
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let input = &input[0];
        assert_eq!(input.shape.len(), 4, "AvgPool2d expects [N, C, H, W]");
        let (n, c, h, w) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
        let k = self.kernel;
        let (oh, ow) = (h / k, w / k);
        let x = input.as_f32_slice();
        let scale = 1.0 / (k * k) as f32;

        let mut out = vec![0.0; n * c * oh * ow];
        for plane in 0..n * c {
            let src = &x[plane * h * w..(plane + 1) * h * w];
            let dst = &mut out[plane * oh * ow..(plane + 1) * oh * ow];
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut sum = 0.0;
                    for ky in 0..k {
                        let row = (oy * k + ky) * w + ox * k;
                        sum += src[row..row + k].iter().sum::<f32>();
                    }
                    dst[oy * ow + ox] = sum * scale;
                }
            }
        }

        Tensor::new(out, vec![n, c, oh, ow])
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        let input = inputs[0];
        let (n, c, h, w) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
        let k = self.kernel;
        let (oh, ow) = (h / k, w / k);
        let g = grad.as_f32_slice();
        let scale = 1.0 / (k * k) as f32;

        let mut input_grad = Tensor::zeros_like(input);
        let dx = input_grad.f32_data_mut();
        for plane in 0..n * c {
            let src = &g[plane * oh * ow..(plane + 1) * oh * ow];
            let dst = &mut dx[plane * h * w..(plane + 1) * h * w];
            for oy in 0..oh {
                for ox in 0..ow {
                    let v = src[oy * ow + ox] * scale;
                    for ky in 0..k {
                        let row = (oy * k + ky) * w + ox * k;
                        dst[row..row + k].iter_mut().for_each(|d| *d = v);
                    }
                }
            }
        }

        vec![input_grad]
    }
}

/// `[N, ...] -> [N, prod(...)]`.
#[derive(Default)]
pub struct Flatten {}

impl Flatten {
    pub fn new() -> Self {
        Flatten {}
    }
}

impl Node for Flatten {
    fn call(&mut self, input: Vec<Tensor>) -> Tensor {
        assert_eq!(input.len(), 1);
        let Some(input) = input.into_iter().next() else {
            return Tensor::null();
        };
        let batch = input.shape[0];
        let rest = input.shape[1..].iter().product();
        input.reshape(vec![batch, rest])
    }

    fn backward(&mut self, grad: &Tensor, inputs: Vec<&Tensor>, _: &Tensor) -> Vec<Tensor> {
        vec![grad.clone().reshape(inputs[0].shape.clone())]
    }
}
