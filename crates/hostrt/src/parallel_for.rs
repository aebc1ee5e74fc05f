// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Parallel-for (component F).
//!
//! Partitions `[0, n)` into blocks of size `B = max(min_block, n / (K * P))`, where `P` is the
//! work queue's reported parallelism and `K` is a fixed oversharding factor. If the whole range
//! fits in one block, `compute` and `on_done` run synchronously on the caller. Otherwise the range
//! of *block indices* `[0, num_blocks)` is bisected recursively: each call either runs its single
//! remaining block directly or splits in half, enqueues one half onto the work queue, and recurses
//! into the other half on the calling thread. The calling thread therefore always does a share of
//! the work itself instead of submitting everything and idling.
//!
//! Unlike [`HostContext::await_all`][crate::HostContext::await_all]/`quiesce`, this call does not
//! block the caller until every block has run - it returns once the caller's own recursive share of
//! the bisection has been submitted and its own leaf block computed. Completion is signaled
//! asynchronously through `on_done`, run by whichever thread's block happens to be the last one to
//! finish, exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::context::HostContext;

/// The minimum ratio of blocks to worker threads we bisect down to, before falling back to
/// `min_block`. Chosen so that even with perfect scheduling there are still a few times more
/// blocks than workers, which keeps the last few workers from idling while stragglers finish.
const K: usize = 4;

/// Heap-resident state shared by every block of one `parallel_for` call. Freed (via the last
/// `Arc` clone dropping) the moment `pending` reaches zero.
struct Execution<C> {
    n: usize,
    block: usize,
    pending: AtomicUsize,
    compute: C,
    on_done: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<C> Execution<C>
where
    C: Fn(usize, usize) + Send + Sync + 'static,
{
    fn run_block(&self, block_index: usize) {
        let lo = block_index * self.block;
        let hi = (block_index + 1) * self.block;
        (self.compute)(lo, hi.min(self.n));

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(on_done) = self.on_done.lock().take() {
                on_done();
            }
        }
    }
}

/// Runs `compute(lo, hi)` once per block covering `[0, n)`, then `on_done()` exactly once after
/// every block has completed. `compute` and `on_done` must tolerate being invoked on a different
/// thread than the caller of this function - only the caller's own leaf block (and, for a small
/// enough `n`, the entire range) is guaranteed to run inline.
pub(crate) fn run<C, D>(ctx: &HostContext, n: usize, min_block: usize, compute: C, on_done: D)
where
    C: Fn(usize, usize) + Send + Sync + 'static,
    D: FnOnce() + Send + 'static,
{
    if n == 0 {
        on_done();
        return;
    }

    let parallelism = ctx.parallelism_level().max(1);
    let min_block = min_block.max(1);
    let block = (n / (K * parallelism)).max(min_block);

    if n <= block {
        compute(0, n);
        on_done();
        return;
    }

    let num_blocks = n.div_ceil(block);
    let execution = Arc::new(Execution {
        n,
        block,
        pending: AtomicUsize::new(num_blocks),
        compute,
        on_done: Mutex::new(Some(Box::new(on_done))),
    });

    eval(ctx, 0, num_blocks, &execution);
}

fn eval<C>(ctx: &HostContext, mut lo: usize, mut hi: usize, execution: &Arc<Execution<C>>)
where
    C: Fn(usize, usize) + Send + Sync + 'static,
{
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;

        let ctx_clone = ctx.clone();
        let execution_clone = Arc::clone(execution);
        ctx.enqueue(Box::new(move || {
            eval(&ctx_clone, mid, hi, &execution_clone);
        }));

        hi = mid;
    }

    execution.run_block(lo);
}
