//! Thread-safe runtime measurement primitives.
//!
//! - [`RollingAverage`]: mean of the last `N` samples.
//! - [`EventRateCounter`]: events seen in a trailing time window.
//! - [`Throttle`]: run an action at most once per interval.
//!
//! Each primitive guards its state with its own mutex and reads time through
//! an injected [`Clock`], so the same types run against the system clock in
//! production and a [`ManualClock`] in tests.

pub mod average;
pub mod clock;
pub mod error;
pub mod rate;
pub mod throttle;
pub mod timing;

pub use average::{RollingAverage, Sample};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use error::ConfigError;
pub use rate::{EventRateCounter, DEFAULT_RATE_WINDOW_MICROS};
pub use throttle::{ConstantInterval, IntervalStrategy, Outcome, RandomInterval, Throttle};
pub use timing::{time_scope, TimingGuard};
