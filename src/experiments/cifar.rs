//! ResNet on CIFAR-10.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use super::{format_elapsed, Scalars};
use crate::config::CifarConfig;
use crate::dataset::cifar::CifarDataset;
use crate::dataset::{Dataloader, Dataset};
use crate::error::{Result, StudyError};
use crate::ml::metrics::ClassificationMetrics;
use crate::ml::models::{Network, ResNetConfig};
use crate::ml::optim::Adam;

pub const DEVICE: &str = "cpu";

#[derive(Clone, Debug, Serialize)]
pub struct CifarEpoch {
    pub epoch: usize,
    pub train_loss: f32,
    pub test_loss: f32,
    /// Percent of test images classified correctly.
    pub accuracy: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct CifarReport {
    pub device: String,
    pub train_samples: usize,
    pub test_samples: usize,
    pub parameters: usize,
    pub epochs: Vec<CifarEpoch>,
    pub elapsed: String,
    pub checkpoint: Option<PathBuf>,
}

impl fmt::Display for CifarReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "current device is {}", self.device)?;
        writeln!(
            f,
            "train {} / test {} images, {} parameters",
            self.train_samples, self.test_samples, self.parameters
        )?;
        for e in &self.epochs {
            writeln!(
                f,
                "Epochs : {} \t Train Loss : {:.4} \t Test Loss : {:.4} \t Accuracy : {:.0} %",
                e.epoch, e.train_loss, e.test_loss, e.accuracy
            )?;
        }
        write!(f, "elapsed : {}", self.elapsed)
    }
}

/// Mean per-sample loss and accuracy in percent over a whole loader.
fn evaluate(net: &mut Network, loader: &Dataloader<CifarDataset>) -> (f32, f32) {
    let mut loss = 0.0;
    let mut correct = 0;
    let mut seen = 0;
    for batch in loader.iter_batch() {
        let n = batch.x.shape[0];
        let y = batch.y;
        let (step, output) = net.evaluate_with_output(batch.x, y.clone());
        let (ok, _) = ClassificationMetrics::correct_count(&output, &y);
        loss += step.loss * n as f32;
        correct += ok;
        seen += n;
    }
    if seen == 0 {
        return (f32::NAN, 0.0);
    }
    (loss / seen as f32, 100.0 * correct as f32 / seen as f32)
}

fn optimizer(cfg: &CifarConfig) -> Adam {
    Adam::with_epsilon(cfg.learning_rate, 0.9, 0.999, cfg.epsilon)
}

/// Training images are always flipped at random, test images only with
/// `flip_test`.
fn loaders(
    train: CifarDataset,
    test: CifarDataset,
    cfg: &CifarConfig,
) -> (Dataloader<CifarDataset>, Dataloader<CifarDataset>) {
    let train =
        Dataloader::new(train.with_random_flip(true), cfg.batch_size, false).shuffle(cfg.shuffle);
    let test = Dataloader::new(test.with_random_flip(cfg.flip_test), cfg.batch_size, false);
    (train, test)
}

fn progress_line(epoch: usize, seen: usize, total: usize, pct: f32, loss: f32) -> String {
    format!(
        "Epochs : {} [{} / {} ({:.0})%] Train Loss : {:.4}",
        epoch, seen, total, pct, loss
    )
}

/// Trains `model` on `train` and evaluates on `test` after every epoch.
pub fn run_on(
    train: CifarDataset,
    test: CifarDataset,
    cfg: &CifarConfig,
    model: &ResNetConfig,
) -> Result<CifarReport> {
    if cfg.batch_size == 0 {
        return Err(StudyError::InvalidArgument("batch_size must be positive".into()));
    }
    if train.is_empty() || test.is_empty() {
        return Err(StudyError::EmptyDataset("cifar split without images".into()));
    }
    let start = Instant::now();
    crate::utills::rand::seed(cfg.seed);
    info!("current device is {}", DEVICE);

    let (train_loader, test_loader) = loaders(train, test, cfg);

    let mut net = model.build();
    net.set_optimizer(optimizer(cfg));
    info!(
        train = train_loader.len(),
        test = test_loader.len(),
        parameters = net.parameter_count(),
        "resnet built"
    );

    let mut scalars = Scalars::new("cifar", cfg.tensorboard);
    let total = train_loader.len();
    let batches = train_loader.num_batches();
    let mut epochs = Vec::with_capacity(cfg.epochs);

    for epoch in 1..=cfg.epochs {
        info!("Epochs : {}", epoch);
        let mut train_loss = 0.0;
        for (batch_idx, batch) in train_loader.iter_batch().enumerate() {
            let n = batch.x.shape[0];
            let step = net.train_step(batch.x, batch.y);
            train_loss += step.loss * n as f32;
            if cfg.log_interval > 0 && batch_idx % cfg.log_interval == 0 {
                let pct = 100.0 * batch_idx as f32 / batches as f32;
                info!("{}", progress_line(epoch, batch_idx * n, total, pct, step.loss));
            }
        }

        let (test_loss, accuracy) = evaluate(&mut net, &test_loader);
        info!("Test Loss : {:.4} \t Accuracy : {:.0} %", test_loss, accuracy);

        let record = CifarEpoch {
            epoch,
            train_loss: train_loss / total as f32,
            test_loss,
            accuracy,
        };
        scalars.log(&[
            ("train/loss", record.train_loss),
            ("val/loss", record.test_loss),
            ("eval/accuracy", record.accuracy),
        ]);
        epochs.push(record);
    }

    if let Some(dir) = cfg.checkpoint_dir.as_ref() {
        net.save(dir)?;
        info!(dir = %dir.display(), "saved checkpoint");
    }

    Ok(CifarReport {
        device: DEVICE.to_string(),
        train_samples: total,
        test_samples: test_loader.len(),
        parameters: net.parameter_count(),
        epochs,
        elapsed: format_elapsed(start.elapsed()),
        checkpoint: cfg.checkpoint_dir.clone(),
    })
}

/// Reads the binary batches under `cfg.data_dir` and trains the default
/// ResNet.
pub fn run(cfg: &CifarConfig) -> Result<CifarReport> {
    let train = CifarDataset::load_train(&cfg.data_dir, cfg.train_limit)?;
    let test = CifarDataset::load_test(&cfg.data_dir, cfg.test_limit)?;
    run_on(train, test, cfg, &ResNetConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::cifar::IMAGE_SIZE;
    use crate::ml::{Optimizer, Tensor};

    const PIXELS: usize = 3 * IMAGE_SIZE * IMAGE_SIZE;

    /// Dark images are class 0, bright images class 1.
    fn two_tone(n: usize) -> CifarDataset {
        let mut bytes = Vec::with_capacity(n * (PIXELS + 1));
        for i in 0..n {
            let label = (i % 2) as u8;
            bytes.push(label);
            bytes.extend(std::iter::repeat(if label == 0 { 10 } else { 240 }).take(PIXELS));
        }
        CifarDataset::from_bytes(&bytes, None).unwrap()
    }

    /// One image whose columns get brighter left to right.
    fn ramp() -> CifarDataset {
        let mut bytes = vec![0u8];
        bytes.extend((0..PIXELS).map(|i| (i % IMAGE_SIZE * 8) as u8));
        CifarDataset::from_bytes(&bytes, None).unwrap()
    }

    fn tiny_resnet() -> ResNetConfig {
        ResNetConfig {
            stem_channels: 2,
            stages: vec![(2, 1, 1), (4, 1, 2)],
            ..ResNetConfig::default()
        }
    }

    #[test]
    fn runs_and_reports_every_epoch() {
        let cfg = CifarConfig {
            batch_size: 4,
            epochs: 2,
            log_interval: 1,
            ..CifarConfig::default()
        };
        let report = run_on(two_tone(8), two_tone(6), &cfg, &tiny_resnet()).unwrap();

        assert_eq!(report.device, "cpu");
        assert_eq!((report.train_samples, report.test_samples), (8, 6));
        assert_eq!(report.epochs.len(), 2);
        for e in &report.epochs {
            assert!(e.train_loss.is_finite() && e.test_loss.is_finite());
            assert!((0.0..=100.0).contains(&e.accuracy));
        }
        let text = report.to_string();
        assert!(text.contains("Accuracy"));
        assert!(text.starts_with("current device is cpu"));
    }

    #[test]
    fn evaluation_counts_every_sample() {
        crate::utills::rand::seed(0);
        let mut net = tiny_resnet().build();
        let loader = Dataloader::new(two_tone(5), 2, false);
        let (loss, accuracy) = evaluate(&mut net, &loader);
        assert!(loss.is_finite());
        // 5 images, so accuracy is a multiple of 20 %
        assert!((accuracy / 20.0 - (accuracy / 20.0).round()).abs() < 1e-4);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = CifarConfig {
            batch_size: 0,
            ..CifarConfig::default()
        };
        assert!(run_on(two_tone(2), two_tone(2), &cfg, &tiny_resnet()).is_err());
    }

    #[test]
    fn progress_line_format() {
        assert_eq!(
            progress_line(3, 6400, 50000, 12.8, 1.23456),
            "Epochs : 3 [6400 / 50000 (13)%] Train Loss : 1.2346"
        );
        assert_eq!(
            progress_line(1, 0, 8, 0.0, 2.0),
            "Epochs : 1 [0 / 8 (0)%] Train Loss : 2.0000"
        );
    }

    #[test]
    fn test_images_flip_only_when_asked() {
        crate::utills::rand::seed(4);
        let upright = ramp().image(0, false);

        let (train, test) = loaders(ramp(), ramp(), &CifarConfig::default());
        assert!((0..32).all(|_| test.dataset().get(0).x == upright));
        assert!((0..32).any(|_| train.dataset().get(0).x != upright));

        let cfg = CifarConfig {
            flip_test: true,
            ..CifarConfig::default()
        };
        let (_, test) = loaders(ramp(), ramp(), &cfg);
        assert!((0..32).any(|_| test.dataset().get(0).x != upright));
    }

    #[test]
    fn adam_uses_the_configured_epsilon() {
        // first step: lr * g / (g + sqrt(1000) * eps) with a tiny gradient
        let grad = Tensor::new(vec![1e-6], vec![1]);
        let step = |epsilon: f32| {
            let cfg = CifarConfig {
                learning_rate: 1.0,
                epsilon,
                ..CifarConfig::default()
            };
            -optimizer(&cfg).optimize(0, vec![&grad])[0].as_f32_slice()[0]
        };
        assert!((step(1e-8) - 1.0 / (1.0 + 1e-2 * 1000f32.sqrt())).abs() < 1e-3);
        assert!(step(1e-7) < 0.3);
    }
}
