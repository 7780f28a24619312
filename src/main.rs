//! Stress demo for the `ticket-spinlock` crate.
//!
//! Spawns `THREADS` threads (default 8), each taking the exclusive
//! [`TicketLock`] `ITERATIONS` times (default 10 000) to bump a shared
//! counter, then does the same through the writer side of a
//! [`RwTicketLock`] while reader threads check they never see a
//! half-finished write.
//!
//! ```text
//! RUST_LOG=debug ticket-stress [THREADS] [ITERATIONS]
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use ticket_spinlock::{RwTicketLock, Strategy, TicketLock};

fn arg_or(index: usize, default: usize) -> usize {
    match std::env::args().nth(index) {
        Some(arg) => arg.parse().unwrap_or_else(|err| {
            log::warn!("ignoring argument {:?}: {}", arg, err);
            default
        }),
        None => default,
    }
}

/// Exclusive lock: every increment must land.
fn run_ticket(threads: usize, iterations: usize) -> u64 {
    let lock = Arc::new(TicketLock::new(0u64));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for i in 0..iterations {
                    *lock.lock() += 1;
                    // scheduling noise
                    if i % 64 == 0 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let panicked = handles.into_iter().map(|h| h.join()).filter(Result::is_err).count();
    if panicked != 0 {
        log::error!("{} ticket lock threads panicked", panicked);
    }

    let total = *lock.lock();
    total
}

/// Outcome of the reader/writer run.
struct RwOutcome {
    version: u64,
    expected: u64,
    /// Torn reads plus threads that panicked.
    failures: usize,
}

/// Reader/writer lock: writers bump the version twice, readers must only
/// ever observe an even, stable version.
fn run_rwticket(threads: usize, iterations: usize) -> RwOutcome {
    let lock = Arc::new(RwTicketLock::new(0u64));
    let pairs = threads.max(2) / 2;

    let writers: Vec<_> = (0..pairs)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..iterations {
                    let mut version = lock.write();
                    *version += 1;
                    *version += 1;
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..pairs)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                let mut torn = 0usize;
                for _ in 0..iterations {
                    let version = lock.read();
                    let seen = *version;
                    thread::yield_now();
                    if seen % 2 != 0 || seen != *version {
                        torn += 1;
                    }
                }
                torn
            })
        })
        .collect();

    let panicked = writers.into_iter().map(|h| h.join()).filter(Result::is_err).count();
    let torn: usize = readers.into_iter().map(|h| h.join().unwrap_or(1)).sum();

    let version = *lock.read();
    RwOutcome {
        version,
        expected: 2 * (pairs * iterations) as u64,
        failures: panicked + torn,
    }
}

fn main() {
    env_logger::init();

    let threads = arg_or(1, 8);
    let iterations = arg_or(2, 10_000);
    log::info!("backoff strategy: {}", Strategy::current());

    println!("Starting ticket lock test ({} threads x {})...", threads, iterations);
    let start = Instant::now();
    let total = run_ticket(threads, iterations);
    println!(
        "Final counter value: {} (expected {}) in {:?}",
        total,
        threads * iterations,
        start.elapsed()
    );

    println!("Starting reader/writer ticket lock test...");
    let start = Instant::now();
    let rw = run_rwticket(threads, iterations);
    println!(
        "Final version: {} (expected {}), failures: {} in {:?}",
        rw.version,
        rw.expected,
        rw.failures,
        start.elapsed()
    );

    if total != (threads * iterations) as u64 || rw.version != rw.expected || rw.failures != 0 {
        log::error!("lock invariant violated");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_run_counts_every_increment() {
        assert_eq!(run_ticket(4, 500), 2_000);
    }

    #[test]
    fn test_rwticket_run_checks_version() {
        let rw = run_rwticket(4, 500);
        assert_eq!(rw.expected, 2 * 2 * 500);
        assert_eq!(rw.version, rw.expected, "writes were lost");
        assert_eq!(rw.failures, 0);
    }
}
