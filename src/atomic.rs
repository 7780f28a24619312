//! # Atomic
//!
//! Sequentially consistent read-modify-write primitives over sub-word *lanes*
//! of a single [`AtomicU32`].
//!
//! Both ticket locks keep all of their counters packed in one 32-bit word so
//! that a try-lock can compare every counter at once with a single
//! compare-and-swap. Instead of overlaying narrower atomics on that word, each
//! counter is described by a lane ([`Lane8`] or [`Lane16`]) and every mutation
//! goes through the whole word:
//!
//! - a lane that occupies the **top** bits of the word is bumped with one
//!   hardware `fetch_add`; the carry out of the lane falls off the word.
//! - any other lane is updated with a compare-and-swap loop, so the addition
//!   wraps inside the lane and never carries into its neighbour.
//!
//! Every read-modify-write here uses [`SeqCst`]. The plain loads are
//! [`Relaxed`] and meant for spin polling only: a caller that leaves a spin
//! loop on the strength of a relaxed load must still synchronize through a
//! fence or a following read-modify-write.
//!
//! ## Example
//! ```rust
//! use core::sync::atomic::AtomicU32;
//! use ticket_spinlock::atomic::{self, Lane16};
//!
//! const LOW: Lane16 = Lane16::at(0);
//! const HIGH: Lane16 = Lane16::at(16);
//!
//! let word = AtomicU32::new(0);
//! atomic::store16(&word, LOW, u16::MAX);
//! atomic::increment16(&word, LOW); // wraps to 0, HIGH untouched
//! assert_eq!(atomic::fetch_and_increment16(&word, HIGH), 0);
//! assert_eq!(atomic::load16(&word, LOW), 0);
//! assert_eq!(atomic::load16(&word, HIGH), 1);
//! ```

use core::sync::atomic::{
    AtomicU32,
    Ordering::{Relaxed, SeqCst},
};

macro_rules! lane {
    ($(#[$meta:meta])* $name:ident, $t:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name {
            shift: u32,
        }

        impl $name {
            /// Width of the lane in bits.
            pub const BITS: u32 = <$t>::BITS;

            /// Describes the lane starting at bit `shift` of the word.
            ///
            /// # Panics
            /// If the lane would extend past bit 31. In a `const` this is a
            /// compile-time error.
            #[inline]
            pub const fn at(shift: u32) -> Self {
                assert!(
                    shift + Self::BITS <= u32::BITS,
                    "lane does not fit in a 32-bit word"
                );
                Self { shift }
            }

            /// Bit offset of the lane's least significant bit.
            #[inline(always)]
            pub const fn shift(self) -> u32 {
                self.shift
            }

            /// Mask selecting the lane's bits within the word.
            #[inline(always)]
            pub const fn mask(self) -> u32 {
                (<$t>::MAX as u32) << self.shift
            }

            /// Reads the lane out of a word value.
            #[inline(always)]
            pub const fn extract(self, word: u32) -> $t {
                (word >> self.shift) as $t
            }

            /// Returns `word` with the lane replaced by `value`.
            #[inline(always)]
            pub const fn insert(self, word: u32, value: $t) -> u32 {
                (word & !self.mask()) | ((value as u32) << self.shift)
            }

            #[inline(always)]
            const fn is_top(self) -> bool {
                self.shift + Self::BITS == u32::BITS
            }
        }
    };
}

lane! {
    /// An 8-bit counter packed inside an [`AtomicU32`].
    Lane8, u8
}

lane! {
    /// A 16-bit counter packed inside an [`AtomicU32`].
    Lane16, u16
}

macro_rules! impl_lane_arithmetic {
    (
        $t:ty, $lane:ident,
        $fetch_add:ident, $add:ident, $increment:ident, $fetch_increment:ident,
        $load:ident
    ) => {
        #[doc = concat!("Adds `delta` to the ", stringify!($t), " lane and returns the previous lane value.")]
        ///
        /// The addition wraps inside the lane. The other lanes of the word
        /// are never modified.
        #[inline]
        pub fn $fetch_add(word: &AtomicU32, lane: $lane, delta: $t) -> $t {
            if lane.is_top() {
                // Carry out of the top lane leaves the word.
                return lane.extract(word.fetch_add((delta as u32) << lane.shift(), SeqCst));
            }

            let mut current = word.load(Relaxed);
            loop {
                let old = lane.extract(current);
                let new = lane.insert(current, old.wrapping_add(delta));
                match word.compare_exchange_weak(current, new, SeqCst, Relaxed) {
                    Ok(_) => return old,
                    Err(actual) => current = actual,
                }
            }
        }

        #[doc = concat!("Adds `delta` to the ", stringify!($t), " lane.")]
        #[inline]
        pub fn $add(word: &AtomicU32, lane: $lane, delta: $t) {
            $fetch_add(word, lane, delta);
        }

        #[doc = concat!("Increments the ", stringify!($t), " lane by one.")]
        #[inline]
        pub fn $increment(word: &AtomicU32, lane: $lane) {
            $fetch_add(word, lane, 1);
        }

        #[doc = concat!("Increments the ", stringify!($t), " lane by one and returns the previous lane value.")]
        #[inline]
        pub fn $fetch_increment(word: &AtomicU32, lane: $lane) -> $t {
            $fetch_add(word, lane, 1)
        }

        #[doc = concat!("Relaxed load of the ", stringify!($t), " lane, for spin polling.")]
        #[inline(always)]
        pub fn $load(word: &AtomicU32, lane: $lane) -> $t {
            lane.extract(word.load(Relaxed))
        }
    };
}

impl_lane_arithmetic!(
    u8, Lane8,
    fetch_and_add8, add8, increment8, fetch_and_increment8,
    load8
);

impl_lane_arithmetic!(
    u16, Lane16,
    fetch_and_add16, add16, increment16, fetch_and_increment16,
    load16
);

/// Sets `*word = desired` if and only if `*word == expected`.
///
/// Returns whether the swap happened. This is the only two-operand
/// comparison in the crate; the try-lock paths are built on it.
#[inline]
pub fn compare_and_swap32(word: &AtomicU32, expected: u32, desired: u32) -> bool {
    word.compare_exchange(expected, desired, SeqCst, Relaxed)
        .is_ok()
}

/// Replaces the 16-bit lane with `value`, leaving the rest of the word intact.
///
/// Concurrent updates to other lanes are never lost.
#[inline]
pub fn store16(word: &AtomicU32, lane: Lane16, value: u16) {
    let mut current = word.load(Relaxed);
    loop {
        let new = lane.insert(current, value);
        match word.compare_exchange_weak(current, new, SeqCst, Relaxed) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}
