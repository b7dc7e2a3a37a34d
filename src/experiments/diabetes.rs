//! Dense regressor on the diabetes progression targets.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use super::{format_elapsed, Scalars};
use crate::config::DiabetesConfig;
use crate::dataset::tabular::{load_diabetes, Tabular, TabularDataset};
use crate::dataset::Dataloader;
use crate::error::{Result, StudyError};
use crate::ml::metrics::{mean_absolute_error, mean_squared_error, r2_score, rmse};
use crate::ml::models::{DenseRegressor, EarlyStopping, Network};
use crate::ml::optim::Adam;
use crate::ml::progress::TrainingProgress;
use crate::ml::Tensor;
use crate::preprocess::{take_rows, train_test_split, validation_split, MinMaxScaler};

#[derive(Clone, Debug, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f32,
    pub mae: f32,
    pub val_loss: Option<f32>,
    pub val_mae: Option<f32>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DiabetesReport {
    pub train_samples: usize,
    pub validation_samples: usize,
    pub test_samples: usize,
    pub parameters: usize,
    pub history: Vec<EpochRecord>,
    pub stopped_early: bool,
    /// Test MSE, the training loss evaluated on the held-out rows.
    pub loss: f32,
    pub mae: f32,
    pub rmse: f32,
    pub r2: f32,
    pub elapsed: String,
    pub checkpoint: Option<PathBuf>,
}

impl fmt::Display for DiabetesReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "train {} / validation {} / test {} rows, {} parameters",
            self.train_samples, self.validation_samples, self.test_samples, self.parameters
        )?;
        if let Some(last) = self.history.last() {
            write!(f, "epoch {}: loss {:.4} mae {:.4}", last.epoch, last.loss, last.mae)?;
            if let (Some(vl), Some(vm)) = (last.val_loss, last.val_mae) {
                write!(f, " val_loss {:.4} val_mae {:.4}", vl, vm)?;
            }
            if self.stopped_early {
                write!(f, " (stopped early)")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "loss : {}", self.loss)?;
        writeln!(f, "mae : {}", self.mae)?;
        writeln!(f, "rmse : {}", self.rmse)?;
        writeln!(f, "r2 : {}", self.r2)?;
        write!(f, "elapsed : {}", self.elapsed)
    }
}

fn targets(y: &[f32]) -> Tensor {
    Tensor::new(y.to_vec(), vec![y.len(), 1])
}

/// Weighted running mean of batch values, so a short last batch counts less.
#[derive(Default)]
struct Running {
    sum: f32,
    count: usize,
}

impl Running {
    fn add(&mut self, value: f32, n: usize) {
        self.sum += value * n as f32;
        self.count += n;
    }

    fn mean(&self) -> f32 {
        if self.count == 0 {
            f32::NAN
        } else {
            self.sum / self.count as f32
        }
    }
}

/// Min-max scaling fitted on the training rows. The test rows go through the
/// same scaler only when `scale_test` is set.
fn scale(train: &Tensor, test: &Tensor, scale_test: bool) -> Result<(Tensor, Tensor)> {
    let mut scaler = MinMaxScaler::new();
    let x_train = scaler.fit_transform(train)?;
    let x_test = if scale_test {
        scaler.transform(test)?
    } else {
        test.clone()
    };
    Ok((x_train, x_test))
}

/// Fits the regressor on `data` and evaluates it on the held-out rows.
pub fn run_on(data: &Tabular, cfg: &DiabetesConfig) -> Result<DiabetesReport> {
    if cfg.batch_size == 0 {
        return Err(StudyError::InvalidArgument("batch_size must be positive".into()));
    }
    let start = Instant::now();
    crate::utills::rand::seed(cfg.seed);

    let (train_rows, test_rows) = train_test_split(data.n_samples(), cfg.train_size, cfg.split_seed)?;
    let train = data.take_rows(&train_rows);
    let test = data.take_rows(&test_rows);

    let (x_train, x_test) = scale(&train.x, &test.x, cfg.scale_test)?;

    let (fit_rows, val_rows) = validation_split(train.n_samples(), cfg.validation_split);
    if fit_rows.is_empty() {
        return Err(StudyError::EmptyDataset(
            "validation split leaves no training rows".into(),
        ));
    }
    let fit_y: Vec<f32> = fit_rows.iter().map(|&r| train.y[r]).collect();
    let loader = Dataloader::new(
        TabularDataset::new(take_rows(&x_train, &fit_rows), fit_y),
        cfg.batch_size,
        false,
    )
    .shuffle(true);
    let validation = (!val_rows.is_empty()).then(|| {
        let y: Vec<f32> = val_rows.iter().map(|&r| train.y[r]).collect();
        (take_rows(&x_train, &val_rows), targets(&y))
    });

    let mut net: Network = DenseRegressor {
        input_dim: data.n_features(),
        hidden: cfg.hidden,
        depth: cfg.depth,
    }
    .build();
    net.set_optimizer(Adam::with_epsilon(
        cfg.learning_rate,
        cfg.beta1,
        cfg.beta2,
        cfg.epsilon,
    ));
    info!(
        train = fit_rows.len(),
        validation = val_rows.len(),
        test = test_rows.len(),
        parameters = net.parameter_count(),
        "diabetes regressor built"
    );

    let mut scalars = Scalars::new("diabetes", cfg.tensorboard);
    let mut stopper = cfg.patience.map(|p| EarlyStopping::new(p, cfg.min_delta));
    let mut progress = TrainingProgress::new(cfg.epochs, loader.num_batches());
    let mut history = Vec::with_capacity(cfg.epochs);
    let mut stopped_early = false;

    for epoch in 1..=cfg.epochs {
        progress.start_epoch();
        let mut loss = Running::default();
        let mut mae = Running::default();
        for batch in loader.iter_batch() {
            let n = batch.x.shape[0];
            let step = net.train_step(batch.x, batch.y);
            loss.add(step.loss, n);
            mae.add(step.metric.unwrap_or(f32::NAN), n);
            progress.update_batch(step.loss);
        }
        progress.finish_epoch();

        let val = validation
            .as_ref()
            .map(|(x, y)| net.evaluate(x.clone(), y.clone()));
        let record = EpochRecord {
            epoch,
            loss: loss.mean(),
            mae: mae.mean(),
            val_loss: val.map(|s| s.loss),
            val_mae: val.and_then(|s| s.metric),
        };
        info!(
            epoch,
            loss = record.loss,
            mae = record.mae,
            val_loss = ?record.val_loss,
            val_mae = ?record.val_mae,
            "epoch done"
        );

        let mut values = vec![("train/loss", record.loss), ("train/mae", record.mae)];
        if let Some(v) = record.val_loss {
            values.push(("val/loss", v));
        }
        scalars.log(&values);

        let monitored = record.val_loss.unwrap_or(record.loss);
        history.push(record);
        if stopper.as_mut().is_some_and(|s| s.update(monitored)) {
            info!(epoch, "no improvement, stopping early");
            stopped_early = true;
            break;
        }
    }

    let prediction = net.predict(x_test);
    let predicted = prediction.as_f32_slice();
    let report = DiabetesReport {
        train_samples: fit_rows.len(),
        validation_samples: val_rows.len(),
        test_samples: test_rows.len(),
        parameters: net.parameter_count(),
        history,
        stopped_early,
        loss: mean_squared_error(&test.y, predicted),
        mae: mean_absolute_error(&test.y, predicted),
        rmse: rmse(&test.y, predicted),
        r2: r2_score(&test.y, predicted),
        elapsed: format_elapsed(start.elapsed()),
        checkpoint: cfg.checkpoint_dir.clone(),
    };

    if let Some(dir) = cfg.checkpoint_dir.as_ref() {
        net.save(dir)?;
        info!(dir = %dir.display(), "saved checkpoint");
    }
    Ok(report)
}

/// Loads the diabetes files from `cfg.data_dir` and runs the study.
pub fn run(cfg: &DiabetesConfig) -> Result<DiabetesReport> {
    let data = load_diabetes(&cfg.data_dir)?;
    info!(samples = data.n_samples(), dir = %cfg.data_dir.display(), "loaded diabetes");
    run_on(&data, cfg)
}
