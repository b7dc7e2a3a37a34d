//! Runnable studies. Each `run` loads its data, fits a model, evaluates it and
//! returns a report that prints as text and serialises to JSON.

pub mod and_gate;
pub mod cancer;
pub mod cifar;
pub mod diabetes;

use std::time::Duration;

#[cfg(feature = "logging")]
use crate::ml::logger::TensorBoardLogger;

/// Optional TensorBoard sink shared by the training loops. Without the
/// `logging` feature every call is a no-op.
pub(crate) struct Scalars {
    #[cfg(feature = "logging")]
    logger: Option<TensorBoardLogger>,
}

impl Scalars {
    pub(crate) fn new(experiment: &str, enabled: bool) -> Self {
        #[cfg(feature = "logging")]
        {
            let logger = enabled.then(|| TensorBoardLogger::for_experiment(experiment));
            if let Some(logger) = logger.as_ref() {
                tracing::info!(dir = %logger.log_dir().display(), "writing tensorboard scalars");
            }
            Scalars { logger }
        }
        #[cfg(not(feature = "logging"))]
        {
            if enabled {
                tracing::warn!(experiment, "tensorboard requested but the `logging` feature is off");
            }
            Scalars {}
        }
    }

    /// Logs the values at the current step, then advances it.
    pub(crate) fn log(&mut self, values: &[(&str, f32)]) {
        #[cfg(feature = "logging")]
        if let Some(logger) = self.logger.as_mut() {
            logger.log_scalars(values);
            logger.next_step();
        }
        #[cfg(not(feature = "logging"))]
        let _ = values;
    }
}

/// `h:mm:ss.micros`, the way elapsed wall time is shown in the reports.
pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60,
        elapsed.subsec_micros()
    )
}
