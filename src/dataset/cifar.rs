//! CIFAR-10 in its binary distribution: each record is one label byte followed
//! by 3072 pixel bytes (red plane, green plane, blue plane; 32x32 row-major).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Dataset, Stackable};
use crate::error::{Result, StudyError};
use crate::ml::Tensor;
use crate::utills::rand::with_rng;

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const NUM_CLASSES: usize = 10;
const PIXELS: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_LEN: usize = 1 + PIXELS;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// Image `[3, 32, 32]` and one-hot label `[10]`.
#[derive(Stackable)]
pub struct ImageSample {
    pub x: Tensor,
    pub y: Tensor,
}

/// Decoded CIFAR-10 records. Pixels are kept as bytes and converted on access:
/// scaled to [0, 1], optionally flipped left-right with probability 0.5, then
/// normalised with mean 0.5 and std 0.5 on every channel.
pub struct CifarDataset {
    pixels: Vec<u8>,
    labels: Vec<u8>,
    random_flip: bool,
}

/// Accepts either the directory holding the `.bin` files or its parent
/// containing `cifar-10-batches-bin/`.
fn batches_dir(dir: &Path) -> PathBuf {
    let nested = dir.join("cifar-10-batches-bin");
    if nested.is_dir() {
        nested
    } else {
        dir.to_path_buf()
    }
}

impl CifarDataset {
    /// Parses concatenated records, keeping at most `limit` of them.
    pub fn from_bytes(bytes: &[u8], limit: Option<usize>) -> Result<Self> {
        let mut dataset = CifarDataset {
            pixels: Vec::new(),
            labels: Vec::new(),
            random_flip: false,
        };
        dataset.extend_from_bytes(bytes, Path::new("<memory>"), limit)?;
        Ok(dataset)
    }

    fn extend_from_bytes(&mut self, bytes: &[u8], source: &Path, limit: Option<usize>) -> Result<()> {
        if bytes.len() % RECORD_LEN != 0 {
            return Err(StudyError::malformed(
                source,
                bytes.len() / RECORD_LEN + 1,
                format!("truncated record: {} bytes is not a multiple of {}", bytes.len(), RECORD_LEN),
            ));
        }
        for (i, record) in bytes.chunks_exact(RECORD_LEN).enumerate() {
            if limit.is_some_and(|l| self.labels.len() >= l) {
                break;
            }
            let label = record[0];
            if label as usize >= NUM_CLASSES {
                return Err(StudyError::malformed(
                    source,
                    i + 1,
                    format!("label {} out of range", label),
                ));
            }
            self.labels.push(label);
            self.pixels.extend_from_slice(&record[1..]);
        }
        Ok(())
    }

    fn load_files(dir: &Path, files: &[&str], limit: Option<usize>) -> Result<Self> {
        let dir = batches_dir(dir);
        let mut dataset = CifarDataset {
            pixels: Vec::new(),
            labels: Vec::new(),
            random_flip: false,
        };
        for name in files {
            if limit.is_some_and(|l| dataset.labels.len() >= l) {
                break;
            }
            let path = dir.join(name);
            let bytes = fs::read(&path)?;
            dataset.extend_from_bytes(&bytes, &path, limit)?;
            debug!(file = %path.display(), total = dataset.labels.len(), "read cifar batch");
        }
        if dataset.labels.is_empty() {
            return Err(StudyError::EmptyDataset(dir.display().to_string()));
        }
        Ok(dataset)
    }

    /// The five training batches, with random flipping on.
    pub fn load_train<P: AsRef<Path>>(dir: P, limit: Option<usize>) -> Result<Self> {
        let dataset = Self::load_files(dir.as_ref(), &TRAIN_FILES, limit)?.with_random_flip(true);
        info!(samples = dataset.len(), "loaded cifar-10 train set");
        Ok(dataset)
    }

    pub fn load_test<P: AsRef<Path>>(dir: P, limit: Option<usize>) -> Result<Self> {
        let dataset = Self::load_files(dir.as_ref(), &[TEST_FILE], limit)?;
        info!(samples = dataset.len(), "loaded cifar-10 test set");
        Ok(dataset)
    }

    pub fn with_random_flip(mut self, random_flip: bool) -> Self {
        self.random_flip = random_flip;
        self
    }

    pub fn label(&self, index: usize) -> usize {
        self.labels[index] as usize
    }

    /// Normalised image, mirrored when `flip` is set.
    pub fn image(&self, index: usize, flip: bool) -> Tensor {
        let src = &self.pixels[index * PIXELS..(index + 1) * PIXELS];
        let mut data = Vec::with_capacity(PIXELS);
        for row in src.chunks_exact(IMAGE_SIZE) {
            let normalise = |b: &u8| (*b as f32 / 255.0 - 0.5) / 0.5;
            if flip {
                data.extend(row.iter().rev().map(normalise));
            } else {
                data.extend(row.iter().map(normalise));
            }
        }
        Tensor::new(data, vec![CHANNELS, IMAGE_SIZE, IMAGE_SIZE])
    }
}

pub fn one_hot(label: usize, classes: usize) -> Tensor {
    let mut data = vec![0.0; classes];
    data[label] = 1.0;
    Tensor::new(data, vec![classes])
}

impl Dataset for CifarDataset {
    type Item = ImageSample;

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> ImageSample {
        let flip = self.random_flip && with_rng(|rng| rng.gen_bool(0.5));
        ImageSample {
            x: self.image(index, flip),
            y: one_hot(self.label(index), NUM_CLASSES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: u8, fill: impl Fn(usize) -> u8) -> Vec<u8> {
        let mut r = vec![label];
        r.extend((0..PIXELS).map(fill));
        r
    }

    #[test]
    fn parses_records_and_limit() {
        let mut bytes = record(3, |_| 0);
        bytes.extend(record(9, |_| 255));
        bytes.extend(record(1, |_| 51));

        let ds = CifarDataset::from_bytes(&bytes, None).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.label(1), 9);

        let sample = ds.get(0);
        assert_eq!(sample.x.shape, vec![3, 32, 32]);
        assert!(sample.x.as_f32_slice().iter().all(|v| (*v + 1.0).abs() < 1e-6));
        assert_eq!(sample.y.as_f32_slice()[3], 1.0);
        assert!(ds.get(1).x.as_f32_slice().iter().all(|v| (*v - 1.0).abs() < 1e-6));

        let limited = CifarDataset::from_bytes(&bytes, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn rejects_truncated_and_bad_labels() {
        let mut bytes = record(0, |_| 0);
        bytes.pop();
        assert!(CifarDataset::from_bytes(&bytes, None).is_err());
        assert!(CifarDataset::from_bytes(&record(10, |_| 0), None).is_err());
    }

    #[test]
    fn flip_mirrors_columns() {
        let bytes = record(0, |i| (i % IMAGE_SIZE) as u8);
        let ds = CifarDataset::from_bytes(&bytes, None).unwrap();
        let plain = ds.image(0, false);
        let flipped = ds.image(0, true);
        let p = plain.as_f32_slice();
        let f = flipped.as_f32_slice();
        assert_eq!(p[0], f[IMAGE_SIZE - 1]);
        assert_eq!(p[IMAGE_SIZE + 5], f[2 * IMAGE_SIZE - 6]);
    }

    #[test]
    fn loads_batches_from_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("cifar-10-batches-bin");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("test_batch.bin"), record(4, |_| 10)).unwrap();

        let ds = CifarDataset::load_test(dir.path(), None).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.label(0), 4);
    }
}
