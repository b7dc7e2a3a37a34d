use crate::ml::Tensor;
use crate::utills::rand::with_rng;

/// CIFAR-10 binary reader and image samples.
pub mod cifar;
/// Tabular datasets (diabetes, breast cancer) and row samples.
pub mod tabular;

pub trait Stackable: Sized {
    type Output;
    fn stack(batch: Vec<Self>) -> Self::Output;
}

impl Stackable for Tensor {
    type Output = Tensor;
    fn stack(batch: Vec<Self>) -> Self::Output {
        assert!(!batch.is_empty(), "batch length is 0");

        for bs in batch.windows(2) {
            assert_eq!(
                bs[0].shape, bs[1].shape,
                "data shape is different, bs[0].shape={:?}, bs[1].shape={:?}",
                bs[0].shape, bs[1].shape
            );
        }

        let mut shape = vec![batch.len()];
        shape.extend_from_slice(&batch[0].shape);

        let mut data = Vec::with_capacity(batch.len() * batch[0].len());
        for b in batch.iter() {
            data.extend_from_slice(b.as_f32_slice());
        }

        Tensor::new(data, shape)
    }
}

pub trait Dataset {
    type Item: Stackable;

    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Self::Item;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batches a [`Dataset`]. Order is sequential unless [`Dataloader::shuffle`]
/// is enabled, in which case every call to `iter_batch` draws a new
/// permutation from the thread-local generator.
pub struct Dataloader<D>
where
    D: Dataset,
{
    dataset: D,
    batch_size: usize,
    drop_last: bool,
    shuffle: bool,
}

impl<D: Dataset> Dataloader<D> {
    pub fn new(dataset: D, batch_size: usize, drop_last: bool) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self {
            dataset,
            batch_size,
            drop_last,
            shuffle: false,
        }
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn iter_batch(&self) -> BatchIterator<'_, D> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            with_rng(|rng| rng.shuffle(&mut indices));
        }

        BatchIterator {
            dataloader: self,
            indices,
            cursor: 0,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches yielded per pass.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }
}

pub struct BatchIterator<'a, D: Dataset> {
    dataloader: &'a Dataloader<D>,
    indices: Vec<usize>,
    cursor: usize,
}

impl<'a, D: Dataset> Iterator for BatchIterator<'a, D> {
    type Item = <D::Item as Stackable>::Output;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.indices.len() - self.cursor;
        let batch_size = self.dataloader.batch_size;
        if remaining == 0 || (self.dataloader.drop_last && remaining < batch_size) {
            return None;
        }

        let end = self.cursor + remaining.min(batch_size);
        let v: Vec<D::Item> = self.indices[self.cursor..end]
            .iter()
            .map(|&index| self.dataloader.dataset.get(index))
            .collect();
        self.cursor = end;

        Some(D::Item::stack(v))
    }
}

// Re-export the derive macro from stackable_derive
pub use stackable_derive::Stackable;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Stackable)]
    struct Pair {
        x: Tensor,
        y: Tensor,
    }

    struct Counting(usize);

    impl Dataset for Counting {
        type Item = Pair;
        fn len(&self) -> usize {
            self.0
        }
        fn get(&self, index: usize) -> Pair {
            Pair {
                x: Tensor::new(vec![index as f32, 0.0], vec![2]),
                y: Tensor::new(vec![index as f32], vec![1]),
            }
        }
    }

    #[test]
    fn sequential_batches_keep_order() {
        let loader = Dataloader::new(Counting(5), 2, false);
        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<Pair> = loader.iter_batch().collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].x.shape, vec![2, 2]);
        assert_eq!(batches[1].y.as_f32_slice(), &[2.0, 3.0]);
        assert_eq!(batches[2].y.shape, vec![1, 1]);
    }

    #[test]
    fn drop_last_skips_partial_batch() {
        let loader = Dataloader::new(Counting(5), 2, true);
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.iter_batch().count(), 2);
    }

    #[test]
    fn shuffled_pass_is_a_permutation() {
        let loader = Dataloader::new(Counting(10), 3, false).shuffle(true);
        let mut seen: Vec<f32> = loader
            .iter_batch()
            .flat_map(|b| b.y.as_f32_slice().to_vec())
            .collect();
        seen.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(seen, (0..10).map(|v| v as f32).collect::<Vec<_>>());
    }
}
