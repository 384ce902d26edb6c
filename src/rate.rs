use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::clock::{Clock, SystemClock};

/// One second, in microseconds.
pub const DEFAULT_RATE_WINDOW_MICROS: u64 = 1_000_000;

struct Events {
    timestamps: VecDeque<u64>,
    last_rate: usize,
}

/// Counts events seen within the trailing `W` microseconds.
///
/// Timestamps are only discarded when the rate is read, so memory grows with
/// the number of events recorded between reads.
pub struct EventRateCounter<const W: u64 = DEFAULT_RATE_WINDOW_MICROS, C = SystemClock> {
    clock: C,
    window_micros: u64,
    inner: Mutex<Events>,
}

impl<const W: u64, C: Clock> EventRateCounter<W, C> {
    pub fn new(clock: C) -> Self {
        Self::with_window(clock, W)
    }

    /// Overrides the window `W` with a runtime value.
    pub fn with_window(clock: C, window_micros: u64) -> Self {
        Self {
            clock,
            window_micros,
            inner: Mutex::new(Events {
                timestamps: VecDeque::new(),
                last_rate: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Events> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_event(&self) {
        // sample under the lock so concurrent appends stay in clock order
        let mut events = self.lock();
        let now = self.clock.now_micros();
        events.timestamps.push_back(now);
    }

    /// Records `count` events, sampling the clock once per event.
    pub fn record_events(&self, count: usize) {
        for _ in 0..count {
            self.record_event();
        }
    }

    /// Number of events within the window ending now.
    pub fn get_rate(&self) -> usize {
        let mut events = self.lock();
        let now = self.clock.now_micros();
        let before = events.timestamps.len();
        // timestamps are appended in clock order, so expiry stops at the first live entry
        while let Some(&oldest) = events.timestamps.front() {
            if oldest.saturating_add(self.window_micros) < now {
                events.timestamps.pop_front();
            } else {
                break;
            }
        }
        let rate = events.timestamps.len();
        if rate != before {
            trace!(expired = before - rate, rate, "expired events flushed");
        }
        events.last_rate = rate;
        rate
    }

    /// Events per second over the window, after flushing.
    pub fn rate_per_sec(&self) -> f64 {
        let count = self.get_rate();
        if self.window_micros == 0 {
            return 0.0;
        }
        count as f64 * 1_000_000.0 / self.window_micros as f64
    }

    /// Rate cached by the last [`get_rate`](Self::get_rate), without flushing.
    pub fn last_rate(&self) -> usize {
        self.lock().last_rate
    }

    pub fn window_micros(&self) -> u64 {
        self.window_micros
    }
}

impl<const W: u64> Default for EventRateCounter<W, SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}
