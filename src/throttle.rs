//! Run periodic work at most once per interval.
//!
//! A [`Throttle`] is polled from the caller's own loop. Each poll either runs
//! the supplied action and re-arms the gate, or does nothing. The gap between
//! runs comes from an [`IntervalStrategy`], recomputed after every run.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;

/// Computes the gap, in microseconds, before the next throttled run.
pub trait IntervalStrategy: Send {
    fn next_interval(&mut self) -> u64;
}

impl<F> IntervalStrategy for F
where
    F: FnMut() -> u64 + Send,
{
    fn next_interval(&mut self) -> u64 {
        self()
    }
}

/// Fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantInterval {
    micros: u64,
}

impl ConstantInterval {
    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self::from_micros(millis.saturating_mul(1_000))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self::from_micros(secs.saturating_mul(1_000_000))
    }

    pub const fn micros(&self) -> u64 {
        self.micros
    }
}

impl IntervalStrategy for ConstantInterval {
    fn next_interval(&mut self) -> u64 {
        self.micros
    }
}

/// Interval drawn uniformly from `[min, max]` microseconds on every re-arm.
///
/// Spreading runs out this way keeps many nodes with the same period from
/// firing in lockstep.
#[derive(Debug, Clone)]
pub struct RandomInterval {
    min: u64,
    max: u64,
    rng: StdRng,
}

impl RandomInterval {
    pub fn new(min_micros: u64, max_micros: u64) -> Result<Self, ConfigError> {
        Self::with_rng(min_micros, max_micros, StdRng::from_os_rng())
    }

    pub fn from_secs(min_secs: u64, max_secs: u64) -> Result<Self, ConfigError> {
        Self::new(
            min_secs.saturating_mul(1_000_000),
            max_secs.saturating_mul(1_000_000),
        )
    }

    /// Deterministic sequence, for reproducible simulations.
    pub fn with_seed(min_micros: u64, max_micros: u64, seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(min_micros, max_micros, StdRng::seed_from_u64(seed))
    }

    fn with_rng(min_micros: u64, max_micros: u64, rng: StdRng) -> Result<Self, ConfigError> {
        if min_micros > max_micros {
            return Err(ConfigError::InvalidRange {
                min: min_micros,
                max: max_micros,
            });
        }
        Ok(Self {
            min: min_micros,
            max: max_micros,
            rng,
        })
    }
}

impl IntervalStrategy for RandomInterval {
    fn next_interval(&mut self) -> u64 {
        self.rng.random_range(self.min..=self.max)
    }
}

/// Result of polling a [`Throttle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The interval had not elapsed, or another run was in flight.
    Skipped,
    /// The action ran and returned this value.
    Ran(bool),
}

impl Outcome {
    /// Collapses to the boolean contract: a skipped poll counts as success.
    pub fn into_bool(self) -> bool {
        match self {
            Outcome::Skipped => true,
            Outcome::Ran(ok) => ok,
        }
    }

    pub fn ran(&self) -> bool {
        matches!(self, Outcome::Ran(_))
    }
}

struct Gate<S> {
    // None is the epoch marker: the next poll fires unconditionally
    last_run: Option<u64>,
    interval: u64,
    running: bool,
    strategy: S,
}

/// Gate that lets an action run at most once per interval.
///
/// The action is called without the internal lock held, so it may take as
/// long as it needs and may even poll the same throttle (that inner poll is
/// skipped). The last-run time is stamped after the action returns, so a
/// slow action pushes the next run further out.
///
/// ```
/// use pacer::{ConstantInterval, ManualClock, Outcome, Throttle};
///
/// let clock = ManualClock::new(0);
/// let throttle = Throttle::new(clock.clone(), ConstantInterval::from_millis(10), true);
/// assert_eq!(throttle.poll(|| true), Outcome::Ran(true));
/// assert_eq!(throttle.poll(|| true), Outcome::Skipped);
/// clock.advance_millis(11);
/// assert_eq!(throttle.poll(|| false), Outcome::Ran(false));
/// ```
pub struct Throttle<S, C = SystemClock>
where
    S: IntervalStrategy,
    C: Clock,
{
    clock: C,
    start_immediately: bool,
    gate: Mutex<Gate<S>>,
}

impl<C: Clock> Throttle<ConstantInterval, C> {
    pub fn every_secs(clock: C, secs: u64, start_immediately: bool) -> Self {
        Self::new(clock, ConstantInterval::from_secs(secs), start_immediately)
    }

    pub fn every_millis(clock: C, millis: u64, start_immediately: bool) -> Self {
        Self::new(clock, ConstantInterval::from_millis(millis), start_immediately)
    }
}

impl<S, C> Throttle<S, C>
where
    S: IntervalStrategy,
    C: Clock,
{
    /// Creates an armed throttle.
    ///
    /// With `start_immediately` the first poll runs the action; otherwise the
    /// first run waits one full interval from construction.
    pub fn new(clock: C, mut strategy: S, start_immediately: bool) -> Self {
        let last_run = if start_immediately {
            None
        } else {
            Some(clock.now_micros())
        };
        let interval = strategy.next_interval();
        Self {
            clock,
            start_immediately,
            gate: Mutex::new(Gate {
                last_run,
                interval,
                running: false,
                strategy,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate<S>> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `action` if the interval has elapsed since the last run.
    pub fn poll<F>(&self, action: F) -> Outcome
    where
        F: FnOnce() -> bool,
    {
        {
            let mut gate = self.lock();
            if gate.running {
                return Outcome::Skipped;
            }
            if let Some(last_run) = gate.last_run {
                let now = self.clock.now_micros();
                if now.saturating_sub(last_run) <= gate.interval {
                    return Outcome::Skipped;
                }
            }
            gate.running = true;
        }

        let rearm = Rearm { throttle: self };
        let ok = action();
        drop(rearm);
        Outcome::Ran(ok)
    }

    /// Boolean form of [`poll`](Self::poll).
    ///
    /// Returns the action's result when it ran and `true` when it was skipped,
    /// so callers cannot tell a skipped poll from a successful run. Use `poll`
    /// when that distinction matters.
    pub fn do_call<F>(&self, action: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        self.poll(action).into_bool()
    }

    /// Lets the next poll run regardless of elapsed time.
    ///
    /// Nothing runs here. A trigger that lands while an action is in flight is
    /// consumed by that run.
    pub fn trigger(&self) {
        self.lock().last_run = None;
    }

    pub fn interval_micros(&self) -> u64 {
        self.lock().interval
    }

    /// Time of the last completed run; `None` before the first run of an
    /// immediate throttle or after [`trigger`](Self::trigger).
    pub fn last_run_micros(&self) -> Option<u64> {
        self.lock().last_run
    }

    pub fn starts_immediately(&self) -> bool {
        self.start_immediately
    }
}

/// Stamps the run and re-arms the gate, also when the action unwinds.
struct Rearm<'a, S, C>
where
    S: IntervalStrategy,
    C: Clock,
{
    throttle: &'a Throttle<S, C>,
}

impl<S, C> Drop for Rearm<'_, S, C>
where
    S: IntervalStrategy,
    C: Clock,
{
    fn drop(&mut self) {
        let mut gate = self.throttle.lock();
        let now = self.throttle.clock.now_micros();
        gate.last_run = Some(now);
        gate.interval = gate.strategy.next_interval();
        gate.running = false;
        debug!(at = now, next_interval_us = gate.interval, "throttled action ran");
    }
}
