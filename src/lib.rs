//! # ticket-spinlock 🎟️
//!
//! Fair, **`no_std`-compatible** spinlocks for short critical sections in
//! latency-sensitive multi-threaded code.
//!
//! The crate includes:
//!
//! - [`TicketLock<T>`] / [`RawTicketLock`] — an exclusive ticket spinlock.
//! - [`RwTicketLock<T>`] / [`RawRwTicketLock`] — a reader/writer ticket
//!   spinlock, FIFO-fair across readers and writers.
//! - [`BackOff`] and [`Strategy`] — SMP-aware spin-then-yield backoff.
//! - [`atomic`] — sequentially consistent read-modify-write primitives on
//!   8- and 16-bit lanes of a 32-bit word.
//!
//! Unlike a test-and-set spinlock, a ticket lock hands itself to waiters in
//! the order they arrived, so no thread can starve under contention.
//!
//! ## 🚀 Quick Example
//!
//! ```rust
//! use ticket_spinlock::{RwTicketLock, Strategy, TicketLock};
//!
//! let lock = TicketLock::new(0);
//! {
//!     let mut guard = lock.lock();
//!     *guard += 1;
//! } // unlocked when the guard is dropped
//! assert_eq!(*lock.lock(), 1);
//!
//! let table = RwTicketLock::with_strategy(vec![1, 2, 3], Strategy::Spin);
//! assert_eq!(table.read().len(), 3);
//! table.write().push(4);
//! ```
//!
//! ## 🧠 Design
//!
//! Each lock is a single `AtomicU32` packing its ticket counters, so the
//! try-lock paths can check every counter with one compare-and-swap. Every
//! state transition is a sequentially consistent read-modify-write; only the
//! spin polling loads are relaxed.
//!
//! Waiters consult a [`BackOff`] on every failed poll. Its [`Strategy`] is
//! chosen per lock: by default from a one-time probe of the host
//! ([`Strategy::current`]), or explicitly through the `with_strategy`
//! constructors.
//!
//! ## ⚠️ Safety & Usage Notes
//!
//! - Use for **short critical sections** only; waiters burn CPU.
//! - The locks are **not reentrant**.
//! - No timeouts: a bounded wait is built from the `try_*` methods.
//! - The exclusive lock admits at most 65535 concurrent requesters, the
//!   reader/writer lock at most 255.
//!
//! ## Feature flags
//!
//! - **`std`** (default) — thread yielding, the CPU probe and the
//!   `TICKET_SPINLOCK_BACKOFF` environment override (`auto`, `spin`,
//!   `yield`).
//! - **`cli`** — builds the `ticket-stress` demo binary.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

pub mod atomic;
pub mod backoff;
pub mod error;
pub mod rwticket;
pub mod ticket;

pub use backoff::{BackOff, Strategy};
pub use error::ParseStrategyError;
pub use rwticket::{
    RawRwTicketLock, RwTicketLock, RwTicketReadGuard, RwTicketState, RwTicketWriteGuard,
};
pub use ticket::{RawTicketLock, TicketGuard, TicketLock, TicketState};
