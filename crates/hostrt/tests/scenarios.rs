// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end scenario tests exercising more than one component of `hostrt` together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hostrt::{AsyncValue, HostContext};

/// S1: an indirect value forwarded to a producer that resolves later fires its waiter exactly
/// once, and a waiter registered after forwarding (but before resolution) still observes it.
#[test]
fn s1_indirect_forwarding_fires_waiters_exactly_once() {
    let indirect = AsyncValue::<u32>::make_indirect();
    let producer = AsyncValue::<u32>::make_unresolved();

    AsyncValue::forward_to(&indirect, producer.clone());

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    indirect.and_then(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    producer.set_concrete(7).unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(indirect.is_concrete());
    assert_eq!(*indirect.get(), 7);

    // A second waiter registered after resolution must also fire, exactly once, synchronously.
    let fired_clone = Arc::clone(&fired);
    indirect.and_then(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

/// S2: `run_when_ready` joins three values resolved from three different threads, firing its
/// callback exactly once, only after the last of the three resolves.
#[test]
fn s2_run_when_ready_joins_three_threads() {
    testing_aids::execute_or_terminate_process(|| {
        let ctx = HostContext::new();
        let x = AsyncValue::<u32>::make_unresolved();
        let y = AsyncValue::<u32>::make_unresolved();
        let z = AsyncValue::<u32>::make_unresolved();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        ctx.run_when_ready(&[x.clone(), y.clone(), z.clone()], move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        let threads: Vec<_> = [
            (z.clone(), 1_u32),
            (x.clone(), 2_u32),
            (y.clone(), 3_u32),
        ]
        .into_iter()
        .map(|(value, n)| std::thread::spawn(move || value.set_concrete(n).unwrap()))
        .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    });
}

/// S3: `parallel_for` over a large range visits every index exactly once via block-granularity
/// `compute(lo, hi)` calls, regardless of how the work happens to get bisected across the queue
/// and the calling thread, and signals completion through `on_done` exactly once.
#[test]
fn s3_parallel_for_covers_every_index_exactly_once() {
    testing_aids::execute_or_terminate_process(|| {
        let ctx = HostContext::builder().with_worker_threads(4).build();
        let counts = Arc::new(Mutex::new(vec![0_u32; 1000]));
        let done_count = Arc::new(AtomicUsize::new(0));

        let counts_clone = Arc::clone(&counts);
        let done_clone = Arc::clone(&done_count);
        ctx.parallel_for(
            1000,
            1,
            move |lo, hi| {
                let mut guard = counts_clone.lock().unwrap();
                for i in lo..hi {
                    guard[i] += 1;
                }
            },
            move || {
                done_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        while done_count.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }

        assert_eq!(done_count.load(Ordering::SeqCst), 1);
        assert!(counts.lock().unwrap().iter().all(|&c| c == 1));
    });
}

/// S4: two threads racing to cancel the same context leave exactly one message installed, and the
/// loser's error future is fully reclaimed (refcount reaches zero, i.e. it is unreachable).
#[test]
fn s4_concurrent_cancel_is_first_writer_wins() {
    let ctx = Arc::new(HostContext::new());

    let a = Arc::clone(&ctx);
    let b = Arc::clone(&ctx);
    let t1 = std::thread::spawn(move || a.cancel("reason A"));
    let t2 = std::thread::spawn(move || b.cancel("reason B"));
    t1.join().unwrap();
    t2.join().unwrap();

    let installed = ctx.cancel_value().expect("exactly one cancellation must be installed");
    assert!(installed.is_error());
    let message = installed.error().message();
    assert!(message == "reason A" || message == "reason B");
}

/// S5: a shared-context type is constructed exactly once even when 64 threads race to fetch it.
#[test]
fn s5_shared_context_factory_runs_once_under_contention() {
    let ctx = Arc::new(HostContext::new());
    let constructed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let constructed = Arc::clone(&constructed);
            std::thread::spawn(move || {
                ctx.get_or_create_shared(move |_ctx| {
                    constructed.fetch_add(1, Ordering::SeqCst);
                    String::from("shared singleton")
                })
            })
        })
        .collect();

    for h in handles {
        assert_eq!(*h.join().unwrap(), "shared singleton");
    }
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
}

/// S6: `quiesce` waits out a large, recursively self-spawning burst of tasks instead of returning
/// as soon as the initial batch completes. Guarded with a watchdog since a bug here is a deadlock,
/// not merely a wrong answer.
#[test]
fn s6_quiesce_terminates_despite_recursive_self_spawning() {
    testing_aids::execute_or_terminate_process(|| {
        let ctx = Arc::new(HostContext::builder().with_worker_threads(8).build());
        let completed = Arc::new(AtomicUsize::new(0));

        fn maybe_spawn_children(ctx: Arc<HostContext>, completed: Arc<AtomicUsize>, depth: u32, seed: u64) {
            completed.fetch_add(1, Ordering::SeqCst);
            if depth == 0 {
                return;
            }
            // Deterministic pseudo-randomness (no `rand` dependency needed): spawn a child task
            // roughly half the time, based on a simple xorshift of `seed`.
            let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if state % 2 == 0 {
                let ctx_clone = Arc::clone(&ctx);
                let completed_clone = Arc::clone(&completed);
                ctx.enqueue(Box::new(move || {
                    maybe_spawn_children(ctx_clone, completed_clone, depth - 1, state);
                }));
            }
        }

        for seed in 0..10_000_u64 {
            let ctx_clone = Arc::clone(&ctx);
            let completed_clone = Arc::clone(&completed);
            ctx.enqueue(Box::new(move || {
                maybe_spawn_children(ctx_clone, completed_clone, 5, seed);
            }));
        }

        ctx.quiesce();
        assert!(completed.load(Ordering::SeqCst) >= 10_000);
    });
}
