/*!
 * Ticket Lock Benchmarks
 *
 * Compare uncontended and contended throughput of the ticket locks against
 * std::sync primitives, under both backoff strategies.
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use ticket_spinlock::{RwTicketLock, Strategy, TicketLock};

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended");

    let ticket = TicketLock::with_strategy(0u64, Strategy::Spin);
    group.bench_function("ticket_lock", |b| {
        b.iter(|| {
            *ticket.lock() += black_box(1);
        })
    });

    let rw = RwTicketLock::with_strategy(0u64, Strategy::Spin);
    group.bench_function("rwticket_read", |b| b.iter(|| black_box(*rw.read())));
    group.bench_function("rwticket_write", |b| {
        b.iter(|| {
            *rw.write() += black_box(1);
        })
    });

    let mutex = Mutex::new(0u64);
    group.bench_function("std_mutex", |b| {
        b.iter(|| {
            *mutex.lock().unwrap() += black_box(1);
        })
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_4x1000");

    for strategy in [Strategy::Spin, Strategy::Yield] {
        group.bench_with_input(
            BenchmarkId::new("ticket_lock", strategy),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    let lock = Arc::new(TicketLock::with_strategy(0u64, strategy));
                    let handles: Vec<_> = (0..4)
                        .map(|_| {
                            let lock = lock.clone();
                            thread::spawn(move || {
                                for _ in 0..1_000 {
                                    *lock.lock() += 1;
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("rwticket_mixed", strategy),
            &strategy,
            |b, &strategy| {
                b.iter(|| {
                    let lock = Arc::new(RwTicketLock::with_strategy(0u64, strategy));
                    let handles: Vec<_> = (0..4)
                        .map(|i| {
                            let lock = lock.clone();
                            thread::spawn(move || {
                                for _ in 0..1_000 {
                                    if i == 0 {
                                        *lock.write() += 1;
                                    } else {
                                        black_box(*lock.read());
                                    }
                                }
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.bench_function("std_rwlock_mixed", |b| {
        b.iter(|| {
            let lock = Arc::new(RwLock::new(0u64));
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let lock = lock.clone();
                    thread::spawn(move || {
                        for _ in 0..1_000 {
                            if i == 0 {
                                *lock.write().unwrap() += 1;
                            } else {
                                black_box(*lock.read().unwrap());
                            }
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended);
criterion_main!(benches);
