use std::collections::VecDeque;

/// A numeric observation that can be held in a [`RollingWindow`].
pub trait Sample: Copy {
    fn to_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($($t:ty),*) => {
        $(impl Sample for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_sample!(u32, u64, i64, f32, f64);

/// Fixed-capacity FIFO of recent samples with an O(1) running mean.
///
/// The window is seeded with one synthetic sample at construction so that
/// [`mean`](Self::mean) is meaningful before any real sample has arrived.
/// The seed is evicted like any other sample once the window fills up.
///
/// Not synchronized on its own; owners wrap it in a lock and hand readers
/// copies of the derived values, never the live buffer.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    samples:   VecDeque<T>,
    capacity:  usize,
    seed:      T,
    sum:       f64,
    evictions: usize,
}

/// Upper bound on the storage reserved up front.
const INITIAL_RESERVE: usize = 1024;

impl<T: Sample> RollingWindow<T> {
    /// Create a window holding at most `capacity` samples (minimum 1),
    /// pre-filled with `seed`. Storage grows as samples arrive.
    pub fn new(capacity: usize, seed: T) -> Self {
        let capacity = capacity.max(1);
        let mut samples = VecDeque::with_capacity(capacity.min(INITIAL_RESERVE));
        samples.push_back(seed);

        Self {
            samples,
            capacity,
            seed,
            sum: seed.to_f64(),
            evictions: 0,
        }
    }

    /// Append a sample, evicting the oldest one first if the window is full.
    pub fn submit(&mut self, value: T) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest.to_f64();
                self.evictions += 1;
            }
        }
        self.samples.push_back(value);
        self.sum += value.to_f64();

        // Recompute the running sum once per full turnover to bound float drift.
        if self.evictions >= self.capacity {
            self.sum = self.samples.iter().map(|s| s.to_f64()).sum();
            self.evictions = 0;
        }
    }

    /// Mean of the samples currently held.
    ///
    /// Falls back to the seed value if the window is somehow empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return self.seed.to_f64();
        }
        self.sum / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Most recently submitted sample (the seed before any submit).
    pub fn latest(&self) -> Option<T> {
        self.samples.back().copied()
    }

    /// Copy of the window contents, oldest first.
    pub fn values(&self) -> Vec<T> {
        self.samples.iter().copied().collect()
    }
}
