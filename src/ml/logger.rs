use chrono::Local;
use std::path::{Path, PathBuf};
use tensorboard_rs::summary_writer::SummaryWriter;

/// TensorBoard scalar logger used by the training loops.
pub struct TensorBoardLogger {
    writer: SummaryWriter,
    log_dir: PathBuf,
    step: usize,
}

impl TensorBoardLogger {
    /// Logs go to `runs/<name>-<timestamp>`.
    pub fn for_experiment(name: &str) -> Self {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S");
        Self::with_log_dir(format!("runs/{}-{}", name, timestamp))
    }

    pub fn with_log_dir<P: AsRef<Path>>(log_dir: P) -> Self {
        let log_dir = log_dir.as_ref().to_path_buf();
        let writer = SummaryWriter::new(&log_dir);
        Self {
            writer,
            log_dir,
            step: 0,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_scalar(&mut self, tag: &str, value: f32) {
        self.writer.add_scalar(tag, value, self.step);
    }

    pub fn log_scalars(&mut self, values: &[(&str, f32)]) {
        for (tag, value) in values {
            self.log_scalar(tag, *value);
        }
    }

    pub fn next_step(&mut self) {
        self.step += 1;
    }
}

impl Drop for TensorBoardLogger {
    fn drop(&mut self) {
        self.writer.flush();
    }
}
