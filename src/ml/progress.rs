//! Per-batch training progress on stderr, so stdout stays free for reports.
//!
//! With the `progress` feature the line is an `indicatif` bar, otherwise a
//! plain carriage-return line.

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(not(feature = "progress"))]
use std::io::{self, Write};

pub struct TrainingProgress {
    num_epochs: usize,
    batches_per_epoch: usize,
    current_epoch: usize,
    current_batch: usize,
    #[cfg(feature = "progress")]
    bar: Option<ProgressBar>,
}

impl TrainingProgress {
    pub fn new(num_epochs: usize, batches_per_epoch: usize) -> Self {
        Self {
            num_epochs,
            batches_per_epoch,
            current_epoch: 0,
            current_batch: 0,
            #[cfg(feature = "progress")]
            bar: None,
        }
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    pub fn start_epoch(&mut self) {
        self.current_epoch += 1;
        self.current_batch = 0;

        #[cfg(feature = "progress")]
        {
            let bar = ProgressBar::new(self.batches_per_epoch as u64);
            if let Ok(style) = ProgressStyle::with_template(
                "{prefix} [{bar:30}] {pos}/{len} {msg}",
            ) {
                bar.set_style(style.progress_chars("=> "));
            }
            bar.set_prefix(format!("Epoch {}/{}", self.current_epoch, self.num_epochs));
            self.bar = Some(bar);
        }
    }

    pub fn update_batch(&mut self, loss: f32) {
        self.current_batch += 1;

        #[cfg(feature = "progress")]
        if let Some(bar) = self.bar.as_ref() {
            bar.set_message(format!("loss: {:.4}", loss));
            bar.inc(1);
        }

        #[cfg(not(feature = "progress"))]
        {
            eprint!(
                "\r  Epoch [{}/{}] Batch [{}/{}] loss: {:.4}",
                self.current_epoch,
                self.num_epochs,
                self.current_batch,
                self.batches_per_epoch,
                loss
            );
            io::stderr().flush().ok();
        }
    }

    /// Clears the batch line; the caller reports the epoch summary itself.
    pub fn finish_epoch(&mut self) {
        #[cfg(feature = "progress")]
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }

        #[cfg(not(feature = "progress"))]
        {
            if self.current_batch > 0 {
                eprint!("\r{:width$}\r", "", width = 60);
                io::stderr().flush().ok();
            }
        }
    }
}
