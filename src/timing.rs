//! Scope timing into a rolling average.

use crate::average::RollingAverage;
use crate::clock::Clock;

/// Measures how long a scope takes and pushes the elapsed microseconds into a
/// [`RollingAverage`] when dropped, including on early return or unwind.
///
/// ```
/// use pacer::{ManualClock, RollingAverage, TimingGuard};
///
/// let clock = ManualClock::new(0);
/// let latency = RollingAverage::<u64, 8>::new();
/// {
///     let _guard = TimingGuard::new(&clock, &latency);
///     clock.advance(250);
/// }
/// assert_eq!(latency.get_last_value(), 250);
/// ```
#[must_use = "the scope is timed until the guard is dropped"]
pub struct TimingGuard<'a, C: Clock, const N: usize> {
    clock: C,
    started: u64,
    average: &'a RollingAverage<u64, N>,
}

impl<'a, C: Clock, const N: usize> TimingGuard<'a, C, N> {
    pub fn new(clock: C, average: &'a RollingAverage<u64, N>) -> Self {
        let started = clock.now_micros();
        Self {
            clock,
            started,
            average,
        }
    }

    /// Microseconds since the guard was created.
    pub fn elapsed_micros(&self) -> u64 {
        self.clock.now_micros().saturating_sub(self.started)
    }
}

impl<C: Clock, const N: usize> Drop for TimingGuard<'_, C, N> {
    fn drop(&mut self) {
        self.average.push(self.elapsed_micros());
    }
}

/// Runs `f`, recording its duration in `average`.
pub fn time_scope<C, T, F, const N: usize>(clock: C, average: &RollingAverage<u64, N>, f: F) -> T
where
    C: Clock,
    F: FnOnce() -> T,
{
    let _guard = TimingGuard::new(clock, average);
    f()
}
