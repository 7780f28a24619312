//! # Ticket Lock
//!
//! A fair, `no_std`-compatible exclusive spinlock built on the classic
//! two-counter ticket scheme (Lamport's bakery, as used for Linux ticket
//! spinlocks).
//!
//! The whole lock is one 32-bit word holding two wrapping 16-bit counters:
//!
//! ```text
//!  31            16 15             0
//! +----------------+----------------+
//! |      next      |    serving     |
//! +----------------+----------------+
//! ```
//!
//! A requester takes the current `next` as its ticket (bumping `next`) and
//! waits until `serving` reaches it. Unlocking bumps `serving`, handing the
//! lock to the oldest waiter. Tickets are therefore served in strict FIFO
//! order and no waiter can starve.
//!
//! Two layers are provided:
//! - [`RawTicketLock`] — the bare lock word with `lock` / `try_lock` /
//!   `unlock`, for embedding next to the state it protects.
//! - [`TicketLock<T>`] — owns the protected data and hands out a
//!   [`TicketGuard`] that unlocks on drop, on every exit path.
//!
//! ## Example
//! ```rust
//! use ticket_spinlock::{Strategy, TicketLock};
//!
//! static COUNTER: TicketLock<u32> = TicketLock::with_strategy(0, Strategy::Spin);
//!
//! fn increment() {
//!     *COUNTER.lock() += 1;
//! }
//!
//! increment();
//! assert_eq!(*COUNTER.lock(), 1);
//! ```
//!
//! ## Caveats
//! - Not reentrant: locking twice from the same thread deadlocks.
//! - At most 65535 threads may hold or wait for one lock at a time.
//! - `try_lock` only succeeds on an idle lock and does not queue, so it can
//!   overtake nobody but also gets no place in line.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{fence, AtomicU32, Ordering::{Acquire, Relaxed}};

use crate::atomic::{self, Lane16};
use crate::{BackOff, Strategy};

const SERVING: Lane16 = Lane16::at(0);
const NEXT: Lane16 = Lane16::at(16);

/// Decoded counters of a [`RawTicketLock`] at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TicketState {
    /// Ticket currently allowed to hold the lock.
    pub serving: u16,
    /// Ticket the next requester will receive.
    pub next: u16,
}

impl TicketState {
    #[inline]
    const fn from_word(word: u32) -> Self {
        Self {
            serving: SERVING.extract(word),
            next: NEXT.extract(word),
        }
    }

    /// Holder plus waiters.
    #[inline]
    pub const fn queue_len(self) -> u16 {
        self.next.wrapping_sub(self.serving)
    }
}

/// The bare ticket lock word.
///
/// Pairing is the caller's job: every successful [`lock`](Self::lock) or
/// [`try_lock`](Self::try_lock) must be matched by exactly one
/// [`unlock`](Self::unlock). Prefer [`TicketLock`] unless the lock has to
/// live apart from the data it protects.
pub struct RawTicketLock {
    word: AtomicU32,
    strategy: Strategy,
}

impl RawTicketLock {
    /// Creates an unlocked lock using the process-wide [`Strategy::current`].
    #[inline]
    pub fn new() -> Self {
        Self::with_strategy(Strategy::current())
    }

    /// Creates an unlocked lock with an explicit backoff strategy.
    #[inline]
    pub const fn with_strategy(strategy: Strategy) -> Self {
        Self {
            word: AtomicU32::new(0),
            strategy,
        }
    }

    #[cfg(test)]
    const fn with_counters(serving: u16, next: u16, strategy: Strategy) -> Self {
        Self {
            word: AtomicU32::new(NEXT.insert(SERVING.insert(0, serving), next)),
            strategy,
        }
    }

    /// Takes a ticket and spins until it is served.
    #[inline]
    pub fn lock(&self) {
        let ticket = atomic::fetch_and_increment16(&self.word, NEXT);

        let backoff = BackOff::new(self.strategy);
        while atomic::load16(&self.word, SERVING) != ticket {
            backoff.wait();
        }
        // The poll above is relaxed; pair with the releasing `unlock`.
        fence(Acquire);
    }

    /// Acquires the lock only if nobody holds it or waits for it.
    ///
    /// Never queues: on failure the lock word is left untouched.
    #[inline]
    pub fn try_lock(&self) -> bool {
        let word = self.word.load(Relaxed);
        let state = TicketState::from_word(word);
        if state.serving != state.next {
            return false;
        }

        atomic::compare_and_swap32(&self.word, word, NEXT.insert(word, state.next.wrapping_add(1)))
    }

    /// Serves the next ticket.
    ///
    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        atomic::increment16(&self.word, SERVING);
    }

    /// Checks whether the lock is currently held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.snapshot().queue_len() != 0
    }

    /// Reads both counters at once.
    #[inline]
    pub fn snapshot(&self) -> TicketState {
        TicketState::from_word(self.word.load(Relaxed))
    }

    #[inline(always)]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

impl Default for RawTicketLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawTicketLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("RawTicketLock")
            .field("serving", &state.serving)
            .field("next", &state.next)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// A fair mutual exclusion primitive owning the data it protects.
///
/// See the [module-level documentation](self) for the algorithm and caveats.
pub struct TicketLock<T: ?Sized> {
    raw: RawTicketLock,
    data: UnsafeCell<T>,
}

/// A guard that releases the [`TicketLock`] when dropped.
///
/// Returned from [`TicketLock::lock`] and [`TicketLock::try_lock`]; derefs to
/// the protected data.
#[must_use = "if unused the TicketLock will immediately unlock"]
pub struct TicketGuard<'a, T: ?Sized> {
    lock: &'a TicketLock<T>,
    marker: PhantomData<&'a mut T>,
}

impl<T> TicketLock<T> {
    /// Creates a new [`TicketLock`] wrapping `data`, using the process-wide
    /// backoff strategy.
    ///
    /// # Example
    /// ```
    /// use ticket_spinlock::TicketLock;
    ///
    /// let lock = TicketLock::new(123);
    /// assert_eq!(*lock.lock(), 123);
    /// ```
    #[inline]
    pub fn new(data: T) -> Self {
        Self::with_strategy(data, Strategy::current())
    }

    /// Creates a new [`TicketLock`] with an explicit backoff strategy.
    ///
    /// Usable in `static` items.
    #[inline]
    pub const fn with_strategy(data: T, strategy: Strategy) -> Self {
        TicketLock {
            raw: RawTicketLock::with_strategy(strategy),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock, returning the protected data.
    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> TicketLock<T> {
    /// Acquires the lock, spinning until this thread's ticket is served.
    #[inline]
    pub fn lock(&self) -> TicketGuard<'_, T> {
        self.raw.lock();
        TicketGuard {
            lock: self,
            marker: PhantomData,
        }
    }

    /// Attempts to acquire an idle lock without waiting.
    ///
    /// Returns `None` if the lock is held or anyone is queued for it.
    #[inline]
    pub fn try_lock(&self) -> Option<TicketGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(TicketGuard {
                lock: self,
                marker: PhantomData,
            })
        } else {
            None
        }
    }

    /// Runs a closure with exclusive access to the data.
    ///
    /// # Example
    /// ```
    /// use ticket_spinlock::TicketLock;
    /// let lock = TicketLock::new(0i32);
    /// let value = lock.with_lock(|data| {
    ///     *data += 1;
    ///     *data
    /// });
    /// assert_eq!(value, 1);
    /// ```
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    /// Unsafely releases the lock manually.
    ///
    /// # Safety
    /// - Only call this if the lock is held and its guard has been forgotten.
    /// - Misuse hands the lock to the next waiter while it is still in use.
    #[inline]
    pub unsafe fn force_unlock(&self) {
        unsafe { self.raw.unlock() }
    }

    /// Checks whether the lock is currently held.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Mutable access without locking; the borrow checker proves exclusivity.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// The underlying lock word.
    #[inline(always)]
    pub fn raw(&self) -> &RawTicketLock {
        &self.raw
    }
}

impl<T: Default> Default for TicketLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for TicketLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("TicketLock");
        match self.try_lock() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish_non_exhaustive()
    }
}

impl<T: ?Sized> Drop for TicketGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: a guard only exists while its lock is held.
        unsafe { self.lock.raw.unlock() }
    }
}

impl<T: ?Sized> Deref for TicketGuard<'_, T> {
    type Target = T;
    #[inline(always)]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TicketGuard<'_, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for TicketGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// Safety: TicketLock enforces mutual exclusion via atomic operations.
unsafe impl<T: ?Sized + Send> Send for TicketLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for TicketLock<T> {}
