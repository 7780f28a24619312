//! # BackOff
//!
//! SMP-aware backoff for the ticket spinlocks.
//!
//! A thread waiting for its ticket does one of two things on every poll of the
//! lock word, chosen once per lock through a [`Strategy`]:
//!
//! - [`Strategy::Spin`] — issue a pause hint ([`core::hint::spin_loop`]) and,
//!   every [`SPIN_LIMIT`] iterations, yield the thread once. This is the right
//!   choice on a multi-core host, where the holder runs on another CPU and is
//!   expected to release shortly.
//! - [`Strategy::Yield`] — yield on every iteration. On a single-core host the
//!   holder cannot make progress while we spin, so spinning only wastes the
//!   one execution unit.
//!
//! [`Strategy::detect`] probes the host; [`Strategy::current`] caches that
//! probe (or the `TICKET_SPINLOCK_BACKOFF` environment override) for the whole
//! process. Locks keep their strategy by value, so tests can pin either
//! behavior explicitly.
//!
//! ## Example
//! ```rust
//! use ticket_spinlock::{BackOff, Strategy};
//!
//! let backoff = BackOff::new(Strategy::Spin);
//! for _ in 0..10 {
//!     backoff.wait();
//! }
//! assert_eq!(backoff.current(), 10);
//! ```
//!
//! ## Feature flags
//! - **`std`** — enables thread yielding, the CPU probe and the environment
//!   override. Without it a yield degrades to a pause hint and
//!   [`Strategy::detect`] always answers [`Strategy::Spin`].

use core::{cell::Cell, fmt, hint::spin_loop, str::FromStr};

use crate::error::ParseStrategyError;

/// Pause iterations between two voluntary yields under [`Strategy::Spin`].
pub const SPIN_LIMIT: u32 = 200;

/// Environment variable read by [`Strategy::current`].
#[cfg(feature = "std")]
pub const BACKOFF_ENV: &str = "TICKET_SPINLOCK_BACKOFF";

/// What a waiting thread does between two polls of a lock word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Pause-hinted busy spin, yielding once every [`SPIN_LIMIT`] iterations.
    Spin,
    /// Yield to the scheduler on every iteration.
    Yield,
}

impl Strategy {
    /// Whether the waiter should yield on its `spins`-th iteration (1-based).
    #[inline(always)]
    pub const fn should_yield(self, spins: u32) -> bool {
        match self {
            Strategy::Spin => spins % SPIN_LIMIT == 0,
            Strategy::Yield => true,
        }
    }

    /// Probes the host: [`Strategy::Spin`] when more than one logical CPU is
    /// available, [`Strategy::Yield`] otherwise.
    #[cfg(feature = "std")]
    pub fn detect() -> Self {
        match std::thread::available_parallelism() {
            Ok(cpus) => {
                let strategy = Self::for_cpus(cpus.get());
                log::debug!("backoff probe: {} logical cpus, using {}", cpus, strategy);
                strategy
            }
            Err(err) => {
                log::warn!("backoff probe failed ({}), assuming an SMP host", err);
                Strategy::Spin
            }
        }
    }

    /// Without `std` there is no scheduler to yield to.
    #[cfg(not(feature = "std"))]
    #[inline]
    pub fn detect() -> Self {
        Strategy::Spin
    }

    /// Strategy for a host with `cpus` logical execution units.
    #[inline]
    pub const fn for_cpus(cpus: usize) -> Self {
        if cpus > 1 {
            Strategy::Spin
        } else {
            Strategy::Yield
        }
    }

    /// The process-wide default strategy.
    ///
    /// Resolved once: `TICKET_SPINLOCK_BACKOFF` (`auto`, `spin` or `yield`)
    /// when set and valid, [`Strategy::detect`] otherwise.
    #[cfg(feature = "std")]
    pub fn current() -> Self {
        static CURRENT: std::sync::OnceLock<Strategy> = std::sync::OnceLock::new();

        *CURRENT.get_or_init(|| match std::env::var(BACKOFF_ENV) {
            Ok(value) => Self::parse_override(&value).unwrap_or_else(|err| {
                log::warn!("ignoring {}: {}", BACKOFF_ENV, err);
                Self::detect()
            }),
            Err(_) => Self::detect(),
        })
    }

    #[cfg(not(feature = "std"))]
    #[inline]
    pub fn current() -> Self {
        Self::detect()
    }

    /// Parses an override value; `auto` defers to [`Strategy::detect`].
    #[cfg(feature = "std")]
    fn parse_override(value: &str) -> Result<Self, ParseStrategyError> {
        if value.trim().eq_ignore_ascii_case("auto") {
            return Ok(Self::detect());
        }
        value.parse()
    }

    /// Lower-case name, as accepted by [`FromStr`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Strategy::Spin => "spin",
            Strategy::Yield => "yield",
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("spin") {
            Ok(Strategy::Spin)
        } else if s.eq_ignore_ascii_case("yield") {
            Ok(Strategy::Yield)
        } else if s.is_empty() {
            Err(ParseStrategyError::Empty)
        } else {
            Err(ParseStrategyError::Unknown)
        }
    }
}

/// Per-acquisition backoff state.
///
/// Create one per spin loop and call [`wait`](BackOff::wait) after every
/// failed poll. The counter restarts after each yield, so a long wait turns
/// into a steady rhythm of [`SPIN_LIMIT`] pauses followed by one yield.
pub struct BackOff {
    strategy: Strategy,
    spins: Cell<u32>,
}

impl BackOff {
    /// Creates a fresh [`BackOff`] for the given strategy.
    #[inline(always)]
    pub const fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            spins: Cell::new(0),
        }
    }

    /// Performs one backoff step: a pause hint or a voluntary yield.
    #[inline]
    pub fn wait(&self) {
        let spins = self.spins.get().wrapping_add(1);

        if self.strategy.should_yield(spins) {
            self.spins.set(0);
            yield_now();
        } else {
            self.spins.set(spins);
            spin_loop();
        }
    }

    /// Iterations since the last yield.
    #[inline(always)]
    pub fn current(&self) -> u32 {
        self.spins.get()
    }

    /// Restarts the iteration count.
    #[inline(always)]
    pub fn reset(&self) {
        self.spins.set(0);
    }

    #[inline(always)]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

#[cfg(feature = "std")]
#[inline]
fn yield_now() {
    log::trace!("backoff: yielding");
    std::thread::yield_now();
}

#[cfg(not(feature = "std"))]
#[inline(always)]
fn yield_now() {
    spin_loop();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spin yields exactly once per SPIN_LIMIT iterations.
    #[test]
    fn test_spin_yields_at_limit() {
        assert!(!Strategy::Spin.should_yield(1));
        assert!(!Strategy::Spin.should_yield(SPIN_LIMIT - 1));
        assert!(Strategy::Spin.should_yield(SPIN_LIMIT));
        assert!(Strategy::Spin.should_yield(2 * SPIN_LIMIT));
    }

    #[test]
    fn test_yield_always_yields() {
        for spins in [1, 2, 199, 200, 201] {
            assert!(Strategy::Yield.should_yield(spins));
        }
    }

    #[test]
    fn test_counter_resets_after_yield() {
        let b = BackOff::new(Strategy::Spin);

        for _ in 0..SPIN_LIMIT - 1 {
            b.wait();
        }
        assert_eq!(b.current(), SPIN_LIMIT - 1);

        b.wait();
        assert_eq!(b.current(), 0, "counter should restart after the yield");

        b.wait();
        assert_eq!(b.current(), 1);
    }

    #[test]
    fn test_yield_strategy_never_accumulates() {
        let b = BackOff::new(Strategy::Yield);
        for _ in 0..5 {
            b.wait();
            assert_eq!(b.current(), 0);
        }
    }

    #[test]
    fn test_reset_behavior() {
        let b = BackOff::new(Strategy::Spin);
        for _ in 0..5 {
            b.wait();
        }
        b.reset();
        assert_eq!(b.current(), 0);
        assert_eq!(b.strategy(), Strategy::Spin);
    }

    #[test]
    fn test_for_cpus() {
        assert_eq!(Strategy::for_cpus(0), Strategy::Yield);
        assert_eq!(Strategy::for_cpus(1), Strategy::Yield);
        assert_eq!(Strategy::for_cpus(2), Strategy::Spin);
        assert_eq!(Strategy::for_cpus(64), Strategy::Spin);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("spin".parse::<Strategy>(), Ok(Strategy::Spin));
        assert_eq!(" YIELD ".parse::<Strategy>(), Ok(Strategy::Yield));
        assert_eq!("".parse::<Strategy>(), Err(ParseStrategyError::Empty));
        assert_eq!("sleep".parse::<Strategy>(), Err(ParseStrategyError::Unknown));
    }

    #[test]
    fn test_display_matches_parse() {
        for s in [Strategy::Spin, Strategy::Yield] {
            assert_eq!(s.as_str().parse::<Strategy>(), Ok(s));
        }
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_auto_override_defers_to_probe() {
        assert_eq!(Strategy::parse_override("auto"), Ok(Strategy::detect()));
        assert!(Strategy::parse_override("bogus").is_err());
    }
}
