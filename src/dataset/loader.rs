//! Batch Assembler
//!
//! Groups the items of a source into batches of `batch_size`, optionally
//! reshuffled at every epoch, optionally dropping the incomplete tail.
//! With `num_workers > 0` the items of a batch are decoded on a dedicated
//! rayon pool; batch order and item order inside a batch are preserved.

use std::marker::PhantomData;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::config::LearningConfig;
use crate::utils::error::{PipelineError, Result};

/// Something that can load its `index`-th item
///
/// `rng` is seeded per item so parallel loading stays reproducible.
pub trait ItemSource: Send + Sync {
    type Item: Send;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, index: usize, rng: &mut ChaCha8Rng) -> Result<Self::Item>;
}

/// Batching policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub num_workers: usize,
    pub seed: u64,
}

impl LoaderConfig {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: false,
            num_workers: 0,
            seed: 42,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl From<&LearningConfig> for LoaderConfig {
    fn from(config: &LearningConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            shuffle: config.shuffle,
            drop_last: config.drop_last,
            num_workers: config.num_workers,
            seed: config.seed,
        }
    }
}

/// Iterates a source batch by batch, one `epoch` at a time
pub struct BatchLoader<B: Backend, S: ItemSource, T, O> {
    source: S,
    batcher: T,
    config: LoaderConfig,
    device: B::Device,
    rng: ChaCha8Rng,
    pool: Option<ThreadPool>,
    _output: PhantomData<fn() -> O>,
}

impl<B, S, T, O> BatchLoader<B, S, T, O>
where
    B: Backend,
    S: ItemSource,
    T: Batcher<B, S::Item, O>,
{
    pub fn new(source: S, batcher: T, config: LoaderConfig, device: &B::Device) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be > 0".to_string()));
        }

        let pool = if config.num_workers > 0 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .thread_name(|i| format!("loader-{}", i))
                .build()
                .map_err(|e| PipelineError::Config(format!("cannot start loader workers: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            source,
            batcher,
            config,
            device: device.clone(),
            pool,
            _output: PhantomData,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of samples in the source
    pub fn num_items(&self) -> usize {
        self.source.len()
    }

    /// `ceil(N / B)`, or `floor(N / B)` when dropping the incomplete tail
    pub fn num_batches(&self) -> usize {
        let n = self.source.len();
        let b = self.config.batch_size;
        if self.config.drop_last {
            n / b
        } else {
            n.div_ceil(b)
        }
    }

    /// Start a pass over the data
    ///
    /// The shuffling RNG lives in the loader, so every epoch gets a new order.
    pub fn epoch(&mut self) -> Epoch<'_, B, S, T, O> {
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }
        let epoch_seed = self.rng.gen::<u64>();

        let usable = self.num_batches() * self.config.batch_size;
        order.truncate(usable.min(order.len()));
        debug!(
            "Epoch over {} items in {} batches (shuffle={}, drop_last={})",
            order.len(),
            self.num_batches(),
            self.config.shuffle,
            self.config.drop_last
        );

        Epoch {
            loader: self,
            order,
            position: 0,
            item_rng: ChaCha8Rng::seed_from_u64(epoch_seed),
        }
    }

    fn load_items(&self, indices: &[usize], seeds: Vec<u64>) -> Result<Vec<S::Item>> {
        let jobs: Vec<(usize, u64)> = indices.iter().copied().zip(seeds).collect();
        let load = |&(index, seed): &(usize, u64)| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            self.source.load(index, &mut rng)
        };

        match &self.pool {
            Some(pool) => pool.install(|| jobs.par_iter().map(load).collect()),
            None => jobs.iter().map(load).collect(),
        }
    }
}

/// One pass over a `BatchLoader`
pub struct Epoch<'a, B: Backend, S: ItemSource, T, O> {
    loader: &'a BatchLoader<B, S, T, O>,
    order: Vec<usize>,
    position: usize,
    item_rng: ChaCha8Rng,
}

impl<B, S, T, O> Iterator for Epoch<'_, B, S, T, O>
where
    B: Backend,
    S: ItemSource,
    T: Batcher<B, S::Item, O>,
{
    type Item = Result<O>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }

        let end = (self.position + self.loader.config.batch_size).min(self.order.len());
        let indices = &self.order[self.position..end];
        self.position = end;

        let seeds: Vec<u64> = indices.iter().map(|_| self.item_rng.gen()).collect();
        let batch = self
            .loader
            .load_items(indices, seeds)
            .map(|items| self.loader.batcher.batch(items, &self.loader.device));
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.loader.config.batch_size);
        (remaining, Some(remaining))
    }
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use std::collections::HashSet;

    type TestBackend = NdArray;

    /// Yields its own index; fails on the configured index
    struct Counting {
        len: usize,
        fail_at: Option<usize>,
    }

    impl ItemSource for Counting {
        type Item = usize;

        fn len(&self) -> usize {
            self.len
        }

        fn load(&self, index: usize, _rng: &mut ChaCha8Rng) -> Result<usize> {
            if Some(index) == self.fail_at {
                return Err(PipelineError::ImageLoad(format!("{}.png", index).into(), "corrupt".to_string()));
            }
            Ok(index)
        }
    }

    #[derive(Clone)]
    struct Collect;

    impl<B: Backend> Batcher<B, usize, Vec<usize>> for Collect {
        fn batch(&self, items: Vec<usize>, _device: &B::Device) -> Vec<usize> {
            items
        }
    }

    fn loader(len: usize, config: LoaderConfig) -> BatchLoader<TestBackend, Counting, Collect, Vec<usize>> {
        BatchLoader::new(Counting { len, fail_at: None }, Collect, config, &Default::default()).unwrap()
    }

    fn collect(loader: &mut BatchLoader<TestBackend, Counting, Collect, Vec<usize>>) -> Vec<Vec<usize>> {
        loader.epoch().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_batch_counts() {
        let mut keep = loader(10, LoaderConfig::new(4));
        assert_eq!(keep.num_batches(), 3);
        let batches = collect(&mut keep);
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9]]);

        let mut drop = loader(10, LoaderConfig::new(4).with_drop_last(true));
        assert_eq!(drop.num_batches(), 2);
        assert_eq!(collect(&mut drop).len(), 2);
    }

    #[test]
    fn test_shuffle_covers_everything_once() {
        let mut l = loader(23, LoaderConfig::new(5).with_shuffle(true).with_seed(7));
        let first: Vec<usize> = collect(&mut l).into_iter().flatten().collect();
        let second: Vec<usize> = collect(&mut l).into_iter().flatten().collect();

        assert_eq!(first.len(), 23);
        assert_eq!(first.iter().copied().collect::<HashSet<_>>().len(), 23);
        assert_eq!(second.iter().copied().collect::<HashSet<_>>().len(), 23);
        assert_ne!(first, second);
        assert_ne!(first, (0..23).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_order() {
        let config = LoaderConfig::new(3).with_shuffle(true).with_seed(11);
        let a = collect(&mut loader(9, config.clone()));
        let b = collect(&mut loader(9, config));
        assert_eq!(a, b);
    }

    #[test]
    fn test_workers_preserve_order() {
        let mut l = loader(17, LoaderConfig::new(4).with_num_workers(3));
        let flat: Vec<usize> = collect(&mut l).into_iter().flatten().collect();
        assert_eq!(flat, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn test_load_error_propagates() {
        let source = Counting { len: 6, fail_at: Some(4) };
        let mut l = BatchLoader::<TestBackend, _, _, Vec<usize>>::new(
            source,
            Collect,
            LoaderConfig::new(2).with_num_workers(2),
            &Default::default(),
        )
        .unwrap();

        let results: Vec<_> = l.epoch().collect();
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(PipelineError::ImageLoad(_, _))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = BatchLoader::<TestBackend, _, _, Vec<usize>>::new(
            Counting { len: 3, fail_at: None },
            Collect,
            LoaderConfig::new(0),
            &Default::default(),
        );
        assert!(result.is_err());
    }
}
