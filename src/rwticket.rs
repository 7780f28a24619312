//! # Reader/Writer Ticket Lock
//!
//! A fair reader/writer spinlock: any number of readers, or one writer,
//! admitted in the order their tickets were issued.
//!
//! The lock is one 32-bit word with three wrapping 8-bit counters:
//!
//! ```text
//!  31      24 23      16 15       8 7        0
//! +----------+----------+----------+----------+
//! |   next   | (unused) |   read   |  write   |
//! +----------+----------+----------+----------+
//! ```
//!
//! - `next` is the ticket the next requester (reader or writer) receives.
//! - `read` is the ticket up to which readers are admitted. An admitted reader
//!   bumps it straight away, so a run of queued readers cascades in together.
//! - `write` is the ticket up to which every holder has released. A writer
//!   waits for `write` to reach its ticket, i.e. for every earlier reader and
//!   writer to be gone.
//!
//! Each ticket advances `read` once and `write` once: a reader on admission
//! and on release respectively, a writer for both at release. A writer
//! therefore blocks every later ticket until it unlocks, and a reader ticketed
//! after a waiting writer cannot overtake it.
//!
//! ## Example
//! ```rust
//! use ticket_spinlock::{RwTicketLock, Strategy};
//!
//! let lock = RwTicketLock::with_strategy(5, Strategy::Spin);
//! {
//!     let r1 = lock.read();
//!     let r2 = lock.read();
//!     assert_eq!(*r1 + *r2, 10);
//!     assert!(lock.try_write().is_none());
//! }
//! *lock.write() += 1;
//! assert_eq!(*lock.read(), 6);
//! ```
//!
//! At most 255 threads may hold or wait for one lock at a time.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{fence, AtomicU32, Ordering::{Acquire, Relaxed}};

use crate::atomic::{self, Lane16, Lane8};
use crate::{BackOff, Strategy};

const WRITE: Lane8 = Lane8::at(0);
const READ: Lane8 = Lane8::at(8);
const NEXT: Lane8 = Lane8::at(24);
// `read` and `write` together, advanced as one by `writer_unlock`.
const ADMIT: Lane16 = Lane16::at(0);

/// Decoded counters of a [`RawRwTicketLock`] at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RwTicketState {
    /// Ticket the next requester will receive.
    pub next: u8,
    /// Ticket up to which readers are admitted.
    pub read_admit: u8,
    /// Ticket up to which all holders have released.
    pub write_admit: u8,
}

impl RwTicketState {
    #[inline]
    const fn from_word(word: u32) -> Self {
        Self {
            next: NEXT.extract(word),
            read_admit: READ.extract(word),
            write_admit: WRITE.extract(word),
        }
    }

    /// Holders plus waiters, readers and writers alike.
    #[inline]
    pub const fn queue_len(self) -> u8 {
        self.next.wrapping_sub(self.write_admit)
    }

    /// Readers admitted and not yet released.
    #[inline]
    pub const fn active_readers(self) -> u8 {
        self.read_admit.wrapping_sub(self.write_admit)
    }
}

/// The bare reader/writer ticket lock word.
///
/// Every successful `reader_*lock` must be matched by one
/// [`reader_unlock`](Self::reader_unlock) and every successful
/// `writer_*lock` by one [`writer_unlock`](Self::writer_unlock).
pub struct RawRwTicketLock {
    word: AtomicU32,
    strategy: Strategy,
}

impl RawRwTicketLock {
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
    const fn with_counters(next: u8, read_admit: u8, write_admit: u8, strategy: Strategy) -> Self {
        let word = NEXT.insert(READ.insert(WRITE.insert(0, write_admit), read_admit), next);
        Self {
            word: AtomicU32::new(word),
            strategy,
        }
    }

    /// Takes a ticket and spins until readers are admitted up to it.
    ///
    /// On return the next queued reader, if any, is already free to enter.
    #[inline]
    pub fn reader_lock(&self) {
        let ticket = atomic::fetch_and_increment8(&self.word, NEXT);

        let backoff = BackOff::new(self.strategy);
        while atomic::load8(&self.word, READ) != ticket {
            backoff.wait();
        }
        atomic::increment8(&self.word, READ);
    }

    /// Enters as a reader only if nobody is queued ahead.
    ///
    /// Succeeds while other readers are active, fails while a writer holds
    /// the lock or any requester is still waiting.
    #[inline]
    pub fn reader_try_lock(&self) -> bool {
        loop {
            let word = self.word.load(Relaxed);
            let ticket = NEXT.extract(word);
            if READ.extract(word) != ticket {
                return false;
            }

            let admitted = ticket.wrapping_add(1);
            let new = READ.insert(NEXT.insert(word, admitted), admitted);
            if atomic::compare_and_swap32(&self.word, word, new) {
                return true;
            }
            // Lost to a concurrent release or requester; re-check.
        }
    }

    /// Releases a read hold.
    ///
    /// # Safety
    /// The caller must hold a read lock.
    #[inline]
    pub unsafe fn reader_unlock(&self) {
        atomic::increment8(&self.word, WRITE);
    }

    /// Takes a ticket and spins until every earlier holder has released.
    #[inline]
    pub fn writer_lock(&self) {
        let ticket = atomic::fetch_and_increment8(&self.word, NEXT);

        let backoff = BackOff::new(self.strategy);
        while atomic::load8(&self.word, WRITE) != ticket {
            backoff.wait();
        }
        // The poll above is relaxed; pair with the releasing unlocks.
        fence(Acquire);
    }

    /// Enters as the writer only if the lock is completely idle.
    #[inline]
    pub fn writer_try_lock(&self) -> bool {
        let word = self.word.load(Relaxed);
        let ticket = NEXT.extract(word);
        if WRITE.extract(word) != ticket {
            return false;
        }

        // `write` already equals our ticket; only `next` moves.
        atomic::compare_and_swap32(&self.word, word, NEXT.insert(word, ticket.wrapping_add(1)))
    }

    /// Releases the write hold, admitting the next reader or writer.
    ///
    /// # Safety
    /// The caller must hold the write lock.
    #[inline]
    pub unsafe fn writer_unlock(&self) {
        let admit = ADMIT.insert(0, atomic::load16(&self.word, ADMIT));
        let read = READ.extract(admit).wrapping_add(1);
        let write = WRITE.extract(admit).wrapping_add(1);
        let admit = READ.insert(WRITE.insert(admit, write), read);

        atomic::store16(&self.word, ADMIT, ADMIT.extract(admit));
    }

    /// Checks whether any reader or writer holds or waits for the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.snapshot().queue_len() != 0
    }

    /// Reads all three counters at once.
    #[inline]
    pub fn snapshot(&self) -> RwTicketState {
        RwTicketState::from_word(self.word.load(Relaxed))
    }

    #[inline(always)]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

impl Default for RawRwTicketLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawRwTicketLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("RawRwTicketLock")
            .field("next", &state.next)
            .field("read_admit", &state.read_admit)
            .field("write_admit", &state.write_admit)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// A fair reader/writer lock owning the data it protects.
pub struct RwTicketLock<T: ?Sized> {
    raw: RawRwTicketLock,
    data: UnsafeCell<T>,
}

/// Shared access to the data of a [`RwTicketLock`]; releases on drop.
#[must_use = "if unused the RwTicketLock will immediately unlock"]
pub struct RwTicketReadGuard<'a, T: ?Sized> {
    lock: &'a RwTicketLock<T>,
    marker: PhantomData<&'a T>,
}

/// Exclusive access to the data of a [`RwTicketLock`]; releases on drop.
#[must_use = "if unused the RwTicketLock will immediately unlock"]
pub struct RwTicketWriteGuard<'a, T: ?Sized> {
    lock: &'a RwTicketLock<T>,
    marker: PhantomData<&'a mut T>,
}

impl<T> RwTicketLock<T> {
    /// Creates a new lock using the process-wide backoff strategy.
    #[inline]
    pub fn new(data: T) -> Self {
        Self::with_strategy(data, Strategy::current())
    }

    /// Creates a new lock with an explicit backoff strategy.
    #[inline]
    pub const fn with_strategy(data: T, strategy: Strategy) -> Self {
        RwTicketLock {
            raw: RawRwTicketLock::with_strategy(strategy),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwTicketLock<T> {
    /// Acquires shared access, waiting behind any earlier writer.
    #[inline]
    pub fn read(&self) -> RwTicketReadGuard<'_, T> {
        self.raw.reader_lock();
        RwTicketReadGuard {
            lock: self,
            marker: PhantomData,
        }
    }

    /// Acquires shared access if nobody is queued ahead.
    #[inline]
    pub fn try_read(&self) -> Option<RwTicketReadGuard<'_, T>> {
        if self.raw.reader_try_lock() {
            Some(RwTicketReadGuard {
                lock: self,
                marker: PhantomData,
            })
        } else {
            None
        }
    }

    /// Acquires exclusive access, waiting for every earlier holder.
    #[inline]
    pub fn write(&self) -> RwTicketWriteGuard<'_, T> {
        self.raw.writer_lock();
        RwTicketWriteGuard {
            lock: self,
            marker: PhantomData,
        }
    }

    /// Acquires exclusive access if the lock is idle.
    #[inline]
    pub fn try_write(&self) -> Option<RwTicketWriteGuard<'_, T>> {
        if self.raw.writer_try_lock() {
            Some(RwTicketWriteGuard {
                lock: self,
                marker: PhantomData,
            })
        } else {
            None
        }
    }

    /// Runs a closure with shared access to the data.
    #[inline]
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.read();
        f(&*guard)
    }

    /// Runs a closure with exclusive access to the data.
    #[inline]
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.write();
        f(&mut *guard)
    }

    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    #[inline(always)]
    pub fn raw(&self) -> &RawRwTicketLock {
        &self.raw
    }
}

impl<T: Default> Default for RwTicketLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwTicketLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("RwTicketLock");
        match self.try_read() {
            Some(guard) => d.field("data", &&*guard),
            None => d.field("data", &format_args!("<locked>")),
        };
        d.finish_non_exhaustive()
    }
}

impl<T: ?Sized> Drop for RwTicketReadGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: a read guard only exists while its read hold is live.
        unsafe { self.lock.raw.reader_unlock() }
    }
}

impl<T: ?Sized> Drop for RwTicketWriteGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: a write guard only exists while its write hold is live.
        unsafe { self.lock.raw.writer_unlock() }
    }
}

impl<T: ?Sized> Deref for RwTicketReadGuard<'_, T> {
    type Target = T;
    #[inline(always)]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Deref for RwTicketWriteGuard<'_, T> {
    type Target = T;
    #[inline(always)]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for RwTicketWriteGuard<'_, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwTicketReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwTicketWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// Safety: readers share `&T` across threads, writers move `&mut T` between them.
unsafe impl<T: ?Sized + Send> Send for RwTicketLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwTicketLock<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(next: u8, read_admit: u8, write_admit: u8) -> RwTicketState {
        RwTicketState {
            next,
            read_admit,
            write_admit,
        }
    }

    #[test]
    fn test_reader_cascade_counters() {
        let raw = RawRwTicketLock::with_strategy(Strategy::Spin);

        raw.reader_lock();
        raw.reader_lock();
        assert_eq!(raw.snapshot(), state(2, 2, 0));
        assert_eq!(raw.snapshot().active_readers(), 2);

        unsafe { raw.reader_unlock() };
        unsafe { raw.reader_unlock() };
        assert_eq!(raw.snapshot(), state(2, 2, 2));
        assert!(!raw.is_locked());
    }

    #[test]
    fn test_writer_counters() {
        let raw = RawRwTicketLock::with_strategy(Strategy::Spin);

        raw.writer_lock();
        assert_eq!(raw.snapshot(), state(1, 0, 0));
        assert_eq!(raw.snapshot().active_readers(), 0);

        unsafe { raw.writer_unlock() };
        assert_eq!(raw.snapshot(), state(1, 1, 1));
    }

    #[test]
    fn test_try_lock_against_writer() {
        let raw = RawRwTicketLock::with_strategy(Strategy::Spin);

        assert!(raw.writer_try_lock(), "idle lock must admit a writer");
        assert!(!raw.reader_try_lock(), "reader must not enter past a writer");
        assert!(!raw.writer_try_lock(), "second writer must not enter");
        assert_eq!(raw.snapshot(), state(1, 0, 0), "failed try must not queue");

        unsafe { raw.writer_unlock() };
        assert!(raw.reader_try_lock());
        unsafe { raw.reader_unlock() };
        assert!(!raw.is_locked());
    }

    #[test]
    fn test_try_lock_against_readers() {
        let raw = RawRwTicketLock::with_strategy(Strategy::Spin);

        assert!(raw.reader_try_lock());
        assert!(raw.reader_try_lock(), "readers share the lock");
        assert!(!raw.writer_try_lock(), "writer must wait for active readers");

        unsafe { raw.reader_unlock() };
        assert!(!raw.writer_try_lock());
        unsafe { raw.reader_unlock() };
        assert!(raw.writer_try_lock(), "idle again once every reader left");
        unsafe { raw.writer_unlock() };
    }

    #[test]
    fn test_reader_try_lock_fails_behind_queued_writer() {
        // one active reader (ticket 0), a writer waiting with ticket 1
        let raw = RawRwTicketLock::with_counters(2, 1, 0, Strategy::Spin);

        assert!(!raw.reader_try_lock(), "reader must not overtake a queued writer");
        assert!(!raw.writer_try_lock());
        assert_eq!(raw.snapshot().queue_len(), 2);
    }

    #[test]
    fn test_counters_wrap() {
        let raw = RawRwTicketLock::with_counters(254, 254, 254, Strategy::Spin);

        for _ in 0..3 {
            raw.writer_lock();
            assert!(!raw.reader_try_lock());
            unsafe { raw.writer_unlock() };

            raw.reader_lock();
            assert!(raw.reader_try_lock());
            unsafe { raw.reader_unlock() };
            unsafe { raw.reader_unlock() };
        }

        assert_eq!(raw.snapshot(), state(7, 7, 7));
        assert_eq!(raw.word.load(Relaxed) & 0x00ff_0000, 0, "unused byte must stay clear");
    }

    #[test]
    fn test_guards() {
        let lock = RwTicketLock::with_strategy(String::from("a"), Strategy::Yield);

        {
            let r1 = lock.read();
            let r2 = lock.try_read().expect("readers share");
            assert_eq!(r1.len() + r2.len(), 2);
            assert!(lock.try_write().is_none());
        }

        lock.write().push('b');
        lock.with_write(|s| s.push('c'));
        assert_eq!(lock.with_read(|s| s.clone()), "abc");
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_debug_output() {
        let lock = RwTicketLock::with_strategy(3, Strategy::Spin);
        {
            let _r = lock.read();
            assert_eq!(format!("{:?}", lock), "RwTicketLock { data: 3, .. }");
        }
        let _w = lock.write();
        assert_eq!(format!("{:?}", lock), "RwTicketLock { data: <locked>, .. }");
    }

    #[test]
    fn test_get_mut_and_into_inner() {
        let mut lock = RwTicketLock::with_strategy(vec![1], Strategy::Spin);
        lock.get_mut().push(2);
        assert_eq!(lock.into_inner(), vec![1, 2]);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_concurrent_writers() {
        use std::sync::Arc;
        use std::thread;

        let lock = Arc::new(RwTicketLock::with_strategy(0u64, Strategy::Spin));
        let mut handles = vec![];

        for i in 0..6 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..2_000 {
                    if i % 2 == 0 {
                        *lock.write() += 1;
                    } else {
                        let _ = *lock.read();
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.read(), 3 * 2_000);
        assert!(!lock.is_locked());
    }
}
