use std::collections::VecDeque;
use std::ops::Add;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Numeric values a [`RollingAverage`] can hold.
///
/// The mean is computed in `Self`'s own arithmetic (so integer windows divide
/// with truncation) and converted to `f64` afterwards.
pub trait Sample: Copy + Default + Add<Output = Self> + Send {
    /// Divides by an element count.
    fn div_count(self, count: usize) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! int_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            fn div_count(self, count: usize) -> Self {
                // a count past the type's range means |mean| < 1
                match <$t>::try_from(count) {
                    Ok(0) | Err(_) => 0,
                    Ok(c) => self / c,
                }
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

macro_rules! float_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            fn div_count(self, count: usize) -> Self {
                self / count as $t
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

int_sample!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
float_sample!(f32, f64);

struct Window<T> {
    capacity: usize,
    values: VecDeque<T>,
    last_average: f64,
}

impl<T: Sample> Window<T> {
    fn push(&mut self, value: T) {
        self.values.push_back(value);
        if self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    fn average(&mut self) -> f64 {
        if self.values.is_empty() {
            return self.last_average;
        }
        let sum = self.values.iter().fold(T::default(), |acc, &v| acc + v);
        self.last_average = sum.div_count(self.values.len()).to_f64();
        self.last_average
    }
}

/// Moving average over the last `N` samples.
///
/// All methods take `&self` and lock internally, so one instance can be
/// shared between threads behind an `Arc`. The lock is not reentrant.
///
/// ```
/// use pacer::RollingAverage;
///
/// let avg = RollingAverage::<i32, 3>::new();
/// avg.push(1);
/// avg.push(2);
/// avg.push(3);
/// assert_eq!(avg.get_average(), 2.0);
/// assert_eq!(avg.update(4), 3.0);
/// ```
pub struct RollingAverage<T, const N: usize> {
    inner: Mutex<Window<T>>,
}

impl<T: Sample, const N: usize> RollingAverage<T, N> {
    pub fn new() -> Self {
        Self::with_capacity(N)
    }

    /// Builds a window whose capacity differs from the default `N` until
    /// [`reset_capacity`](Self::reset_capacity) is called.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Window {
                capacity,
                values: VecDeque::with_capacity(capacity.min(4096) + 1),
                last_average: 0.0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a sample, evicting the oldest one once the window is full.
    pub fn push(&self, value: T) {
        self.lock().push(value);
    }

    /// Pushes `value` and returns the new mean under a single lock hold.
    pub fn update(&self, value: T) -> f64 {
        let mut window = self.lock();
        window.push(value);
        window.average()
    }

    /// Mean of the current window.
    ///
    /// An empty window reports the last mean that was computed (0 for a fresh
    /// instance), never a jump to zero.
    pub fn get_average(&self) -> f64 {
        self.lock().average()
    }

    /// Most recent sample, or zero when the window is empty.
    pub fn get_last_value(&self) -> T {
        self.lock().values.back().copied().unwrap_or_default()
    }

    /// Restores the default capacity `N`.
    ///
    /// When shrinking, the oldest `N` samples are kept and the newer overflow
    /// is dropped.
    pub fn reset_capacity(&self) {
        let mut window = self.lock();
        window.capacity = N;
        window.values.truncate(N);
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().values.is_empty()
    }

    /// Last computed mean, without recomputing it.
    pub fn last_average(&self) -> f64 {
        self.lock().last_average
    }

    /// Copy of the window contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().values.iter().copied().collect()
    }
}

impl<T: Sample, const N: usize> Default for RollingAverage<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Sample + std::fmt::Debug, const N: usize> std::fmt::Debug for RollingAverage<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = self.lock();
        f.debug_struct("RollingAverage")
            .field("capacity", &window.capacity)
            .field("values", &window.values)
            .field("last_average", &window.last_average)
            .finish()
    }
}
