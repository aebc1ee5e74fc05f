// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The host execution context (component E).
//!
//! A [`HostContext`] binds one [`HostAllocator`], one [`WorkQueue`], and one shared-context
//! registry together behind a single handle, and is the thing every other component in this crate
//! is ultimately constructed through. It is cheap to clone (an `Arc` bump) and is meant to be held
//! for the lifetime of whatever dataflow runtime embeds this crate.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::allocator::{GlobalAllocator, HostAllocator};
use crate::async_value::AsyncValue;
use crate::diagnostic::{Diagnostic, DiagnosticSink, TracingDiagnosticSink};
use crate::error::{Error, Result};
use crate::parallel_for;
use crate::refcounted::{Ref, RefCounted};
use crate::shared_context::SharedContextRegistry;
use crate::work_queue::{ThreadPoolWorkQueue, WorkQueue};

/// Sentinel owner index for [`Ref`]s and [`AsyncValue`]s allocated without a `HostContext` (via
/// the global allocator directly).
pub(crate) const NO_OWNER_INDEX: u32 = u32::MAX;

/// Hard cap on the number of `HostContext`s that may be live in a process simultaneously. Chosen
/// generously for a per-process singleton-or-few usage pattern; a real workload creating anywhere
/// near this many independent contexts has a different problem.
const MAX_CONTEXTS: usize = 256;

static NEXT_INSTANCE_INDEX: AtomicU32 = AtomicU32::new(0);
static CONTEXT_TABLE: Mutex<Vec<Option<ContextTableEntry>>> = Mutex::new(Vec::new());

struct ContextTableEntry {
    instance_index: u32,
    allocator: Arc<dyn HostAllocator>,
}

fn table_slot(instance_index: u32) -> usize {
    instance_index as usize % MAX_CONTEXTS
}

/// Registers `allocator` under `instance_index` so that [`reclaim`] can route deallocation for
/// `Ref`s outliving whatever scope created them, as long as the owning context is still alive.
fn register(instance_index: u32, allocator: Arc<dyn HostAllocator>) {
    let mut table = CONTEXT_TABLE.lock();
    let slot = table_slot(instance_index);
    if table.len() <= slot {
        table.resize_with(slot + 1, || None);
    }
    table[slot] = Some(ContextTableEntry { instance_index, allocator });
}

/// Clears the table slot for `instance_index`, called from [`HostContext`]'s teardown.
fn unregister(instance_index: u32) {
    let mut table = CONTEXT_TABLE.lock();
    let slot = table_slot(instance_index);
    if let Some(entry) = &table[slot] {
        if entry.instance_index == instance_index {
            table[slot] = None;
        }
    }
}

/// Routes deallocation of a `Ref<T>` cell back through the allocator of the context identified by
/// `owner_index`, if that context is still alive. Returns `false` (meaning: the caller should fall
/// back to the global allocator) if the context has already been torn down - this can only happen
/// if a `Ref` outlives its owning `HostContext`, which is legal (contexts do not track outstanding
/// `Ref`s) but means the memory was allocated via `owner.allocate_bytes` while the context lived
/// and must now be reclaimed by whichever allocator is still around, or else leaked. In practice
/// `HostAllocator` implementations are stateless pools keyed by layout, not by context, so reusing
/// a *different* live allocator of the same concrete type is sound; we deliberately do not attempt
/// that cleverness here and simply report `false`, leaking rather than risking a cross-allocator
/// free when we can't prove liveness.
#[cfg_attr(test, mutants::skip)] // only observable via precise allocator-call counting
pub(crate) fn reclaim(owner_index: u32, ptr: NonNull<u8>, layout: Layout) -> bool {
    let table = CONTEXT_TABLE.lock();
    let slot = table_slot(owner_index);
    let Some(entry) = table.get(slot).and_then(|e| e.as_ref()) else {
        return false;
    };
    if entry.instance_index != owner_index {
        return false;
    }
    let allocator = Arc::clone(&entry.allocator);
    drop(table);

    // SAFETY: `ptr`/`layout` were produced by a prior `allocate` call on this same allocator
    // instance, from `Ref::new_in`.
    unsafe { allocator.deallocate(ptr, layout.size(), layout.align()) };
    true
}

/// Reports a panic caught while running an [`AsyncValue`] waiter through `owner_index`'s
/// diagnostic sink, or to `tracing` directly if the owning context is gone or the value was never
/// associated with one.
pub(crate) fn report_waiter_panic(owner_index: u32, payload: Box<dyn std::any::Any + Send>) {
    let message = panic_message(&payload);
    let diagnostic = Diagnostic::new(format!("panic in AsyncValue waiter: {message}"));

    if owner_index != NO_OWNER_INDEX {
        let table = CONTEXT_TABLE.lock();
        let slot = table_slot(owner_index);
        if let Some(entry) = table.get(slot).and_then(|e| e.as_ref()) {
            if entry.instance_index == owner_index {
                drop(table);
                tracing::event!(tracing::Level::ERROR, %message, "waiter panicked");
                return;
            }
        }
    }

    tracing::event!(tracing::Level::ERROR, %message, "waiter panicked (no owning context)");
    let _ = diagnostic;
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// A per-process host execution context (component E).
///
/// Cheap to clone - internally an `Arc` around the shared state. Dropping the last clone tears the
/// context down: the ready sentinel is dropped, the context's slot in the global instance table is
/// cleared, and then the shared-context registry, work queue and allocator are torn down in that
/// order.
#[derive(Clone)]
pub struct HostContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    instance_index: u32,
    diagnostic_sink: Box<dyn DiagnosticSink>,
    ready: Mutex<Option<Ref<AsyncValue<()>>>>,
    cancel: AtomicPtr<RefCounted<AsyncValue<()>>>,
    registry: SharedContextRegistry,
    queue: Box<dyn WorkQueue>,
    allocator: Arc<dyn HostAllocator>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // 1. Drop the ready sentinel first, while our allocator and table slot are still alive.
        drop(self.ready.lock().take());

        // Reclaim the cancellation slot, if any was ever installed.
        let cancelled = self.cancel.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if let Some(nn) = NonNull::new(cancelled) {
            // SAFETY: this pointer was produced by `Ref::into_raw` in `HostContext::cancel` and is
            // reachable only through `self.cancel`, which we just claimed exclusively.
            drop(unsafe { Ref::from_raw(nn) });
        }

        // 2. Clear our slot in the global instance table.
        unregister(self.instance_index);

        tracing::event!(
            tracing::Level::DEBUG,
            instance_index = self.instance_index,
            "host context torn down"
        );

        // 3. `registry`, `queue` and `allocator` are dropped automatically, in that declaration
        // order, immediately after this function returns.
    }
}

impl HostContext {
    /// Starts building a `HostContext` with default configuration.
    #[must_use]
    pub fn builder() -> HostContextBuilder {
        HostContextBuilder::default()
    }

    /// Builds a `HostContext` with every default: a global-allocator-backed allocator, a thread
    /// pool sized to [`std::thread::available_parallelism`], and a `tracing`-only diagnostic sink.
    ///
    /// # Panics
    ///
    /// Panics if the process already has [`MAX_CONTEXTS`] live `HostContext`s.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    fn from_parts(
        allocator: Arc<dyn HostAllocator>,
        queue: Box<dyn WorkQueue>,
        diagnostic_sink: Box<dyn DiagnosticSink>,
    ) -> Self {
        let instance_index = NEXT_INSTANCE_INDEX.fetch_add(1, Ordering::Relaxed);
        assert!(
            (instance_index as usize) < MAX_CONTEXTS,
            "exceeded the maximum of {MAX_CONTEXTS} live HostContexts in this process"
        );

        register(instance_index, Arc::clone(&allocator));

        let inner = Arc::new(ContextInner {
            instance_index,
            diagnostic_sink,
            ready: Mutex::new(None),
            cancel: AtomicPtr::new(std::ptr::null_mut()),
            registry: SharedContextRegistry::new(),
            queue,
            allocator,
        });

        let context = Self { inner };
        let ready = AsyncValue::make_available_in(&context, ());
        *context.inner.ready.lock() = Some(ready);

        tracing::event!(
            tracing::Level::DEBUG,
            instance_index = context.instance_index(),
            "host context constructed"
        );

        context
    }

    /// This context's slot in the process-global instance table, assigned once at construction
    /// from a monotonic counter.
    #[must_use]
    pub fn instance_index(&self) -> u32 {
        self.inner.instance_index
    }

    /// An always-available, never-erroring future, suitable as a join-free starting point for
    /// chains that need *some* `AsyncValue` to hang a continuation off of.
    #[must_use]
    pub fn ready(&self) -> Ref<AsyncValue<()>> {
        self.inner
            .ready
            .lock()
            .as_ref()
            .expect("ready sentinel is only cleared during teardown, after which this context cannot be observed")
            .clone()
    }

    /// Allocates `size` bytes aligned to `align` via this context's configured [`HostAllocator`].
    ///
    /// # Safety
    ///
    /// Same contract as [`HostAllocator::allocate`]: `align` must be a nonzero power of two and
    /// `size` rounded up to `align` must not overflow `isize`.
    pub unsafe fn allocate_bytes(&self, size: usize, align: usize) -> NonNull<u8> {
        // SAFETY: forwarded verbatim; caller upholds the same contract as `HostAllocator::allocate`.
        unsafe { self.inner.allocator.allocate(size, align) }
    }

    /// Deallocates memory previously returned by [`HostContext::allocate_bytes`] on this same
    /// context, via this context's configured [`HostAllocator`].
    ///
    /// # Safety
    ///
    /// Same contract as [`HostAllocator::deallocate`]: `ptr` must have been returned by a prior
    /// call to `allocate_bytes` on this context with the same `size` and `align`, and must not be
    /// used again afterward.
    pub unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        // SAFETY: forwarded verbatim; caller upholds the same contract as `HostAllocator::deallocate`.
        unsafe { self.inner.allocator.deallocate(ptr, size, align) };
    }

    /// Submits `task` to the non-blocking work queue. Never blocks the calling thread.
    pub fn enqueue(&self, task: Box<dyn FnOnce() + Send>) {
        self.inner.queue.enqueue(task);
    }

    /// Submits `task` to the blocking work queue, which may reject it under backpressure.
    ///
    /// Callers that need the unrun task back (to retry it, log it, or fold it into some other
    /// recovery path) should go through [`WorkQueue::try_enqueue_blocking`] on a queue obtained via
    /// [`HostContextBuilder::build`] directly; this convenience wrapper reports rejection as an
    /// error and drops the task, matching the `Result`-based error idiom the rest of this type uses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] if the blocking queue is full and `allow_queuing` is `false`.
    pub fn try_enqueue_blocking(
        &self,
        task: Box<dyn FnOnce() + Send>,
        allow_queuing: bool,
    ) -> Result<()> {
        self.inner
            .queue
            .try_enqueue_blocking(task, allow_queuing)
            .map_err(|_task| Error::Rejected("blocking queue is at capacity".to_string()))
    }

    /// Blocks the calling thread until every task submitted so far (to either queue) has run.
    pub fn await_all(&self) {
        self.inner.queue.await_all();
    }

    /// Blocks the calling thread until the work queue has no outstanding or pending tasks,
    /// including tasks that recursively enqueue further tasks.
    pub fn quiesce(&self) {
        self.inner.queue.quiesce();
    }

    /// The number of worker threads backing the non-blocking queue.
    #[must_use]
    pub fn parallelism_level(&self) -> usize {
        self.inner.queue.parallelism_level()
    }

    /// Runs `compute(lo, hi)` once per block covering `0..n`, bisecting the range of blocks across
    /// the work queue and the calling thread (component F), then runs `on_done` exactly once after
    /// every block has completed.
    ///
    /// This does not block the caller: it returns once the caller's own share of the recursive
    /// bisection has been submitted and computed. If `n` is small enough to fit in a single block,
    /// both `compute` and `on_done` run synchronously before this call returns; otherwise `on_done`
    /// runs later, on whichever thread's block happens to finish last.
    pub fn parallel_for<C, D>(&self, n: usize, min_block: usize, compute: C, on_done: D)
    where
        C: Fn(usize, usize) + Send + Sync + 'static,
        D: FnOnce() + Send + 'static,
    {
        parallel_for::run(self, n, min_block, compute, on_done);
    }

    /// Fetches the process-wide singleton of type `T` for this context, constructing it via
    /// `factory` on exactly one caller if it does not already exist (component G). `factory` is
    /// handed this context, so a shared context that needs to stash a handle back to it (to touch
    /// the diagnostic sink, or enqueue its own work, for example) can do so during construction.
    ///
    /// # Panics
    ///
    /// Aborts if the registry has no free slot left for a new type - this is a fatal capacity
    /// condition, the same as exceeding the maximum number of live `HostContext`s.
    pub fn get_or_create_shared<T, F>(&self, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&HostContext) -> T,
    {
        self.inner.registry.get_or_create(self, factory)
    }

    /// Creates an already-resolved, errored `AsyncValue` carrying `diagnostic`, allocated via this
    /// context.
    #[must_use]
    pub fn make_error_future<T>(&self, diagnostic: Diagnostic) -> Ref<AsyncValue<T>>
    where
        T: Send + Sync + 'static,
    {
        AsyncValue::make_error_in(self, diagnostic)
    }

    /// Creates an indirect `AsyncValue` (component B) allocated via this context, ready to be
    /// pointed at its eventual producer with `AsyncValue::forward_to`.
    #[must_use]
    pub fn make_indirect_future<T>(&self) -> Ref<AsyncValue<T>>
    where
        T: Send + Sync + 'static,
    {
        AsyncValue::make_indirect_in(self)
    }

    /// Routes `diagnostic` to this context's installed [`DiagnosticSink`].
    pub fn emit_error(&self, diagnostic: &Diagnostic) {
        self.inner.diagnostic_sink.emit(diagnostic);
    }

    /// Marks this context cancelled with `message`. Only the first call wins - subsequent calls
    /// (even concurrent ones) observe that cancellation was already recorded and their own
    /// candidate error future is simply dropped unused.
    pub fn cancel(&self, message: impl Into<String>) {
        let diagnostic = Diagnostic::new(message.into());
        let candidate: Ref<AsyncValue<()>> = AsyncValue::make_error_in(self, diagnostic);
        let raw = candidate.into_raw();

        let outcome = self.inner.cancel.compare_exchange(
            std::ptr::null_mut(),
            raw.as_ptr(),
            Ordering::Release,
            Ordering::Relaxed,
        );

        if outcome.is_err() {
            // Someone else already cancelled first; reclaim our unused candidate.
            // SAFETY: `raw` was produced by `into_raw` immediately above and was never installed
            // anywhere else, since the compare_exchange that would have installed it just failed.
            drop(unsafe { Ref::from_raw(raw) });
        } else {
            tracing::event!(tracing::Level::WARN, instance_index = self.instance_index(), "context cancelled");
        }
    }

    /// The cancellation error future installed by [`HostContext::cancel`], if any, without
    /// clearing it.
    #[must_use]
    pub fn cancel_value(&self) -> Option<Ref<AsyncValue<()>>> {
        let ptr = self.inner.cancel.load(Ordering::Acquire);
        let nn = NonNull::new(ptr)?;
        // SAFETY: `nn` was installed by `cancel` and is only ever cleared by `restart` or
        // teardown; we are not racing either destructively here, only reading, so the pointee is
        // guaranteed live for the duration of this call.
        Some(unsafe { Ref::clone_from_raw(nn) })
    }

    /// Clears any cancellation previously installed by [`HostContext::cancel`], allowing the
    /// context to accept new work again.
    pub fn restart(&self) {
        let previous = self.inner.cancel.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if let Some(nn) = NonNull::new(previous) {
            // SAFETY: see `cancel_value` - this is the unique owning slot for this pointer, and we
            // just claimed it exclusively via `swap`.
            drop(unsafe { Ref::from_raw(nn) });
        }
    }

    /// Registers `callback` to run once every value in `values` has resolved (to either a concrete
    /// value or an error - resolution of any kind counts, matching `AsyncValue::is_available`).
    /// `callback` does not short-circuit on the first error; it always waits for every value.
    ///
    /// An empty `values` runs `callback` synchronously on the calling thread.
    pub fn run_when_ready<T>(&self, values: &[Ref<AsyncValue<T>>], callback: impl FnOnce() + Send + 'static)
    where
        T: Send + Sync + 'static,
    {
        if values.is_empty() {
            callback();
            return;
        }

        let pending = Arc::new(AtomicU32::new(values.len() as u32));
        let callback = Arc::new(Mutex::new(Some(callback)));

        for value in values {
            let pending = Arc::clone(&pending);
            let callback = Arc::clone(&callback);
            value.and_then(move || {
                if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if let Some(callback) = callback.lock().take() {
                        callback();
                    }
                }
            });
        }
    }

    /// Blocks the calling thread until every value in `values` has resolved (to either a concrete
    /// value or an error - resolution of any kind counts, matching [`AsyncValue::is_available`]).
    ///
    /// An empty `values` returns immediately. Unlike [`WorkQueue::await_all`]/[`WorkQueue::quiesce`],
    /// this waits on a specific set of values rather than draining the whole queue; it does not
    /// steal or run work on the calling thread while it waits, it only parks.
    ///
    /// # Panics
    ///
    /// Panics if called from a work queue worker thread, since the values being waited on may
    /// themselves only be resolved by a task that runs on that very thread.
    pub fn await_values<T>(&self, values: &[Ref<AsyncValue<T>>])
    where
        T: Send + Sync + 'static,
    {
        if values.is_empty() {
            return;
        }

        crate::non_blocking_thread::assert_not_flagged();

        let pending = Arc::new(AtomicU32::new(values.len() as u32));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));

        for value in values {
            let pending = Arc::clone(&pending);
            let gate = Arc::clone(&gate);
            value.and_then(move || {
                if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let (done, condvar) = &*gate;
                    *done.lock() = true;
                    condvar.notify_all();
                }
            });
        }

        let (done, condvar) = &*gate;
        let mut guard = done.lock();
        while !*guard {
            condvar.wait(&mut guard);
        }
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("instance_index", &self.instance_index())
            .field("parallelism_level", &self.parallelism_level())
            .finish()
    }
}

/// Builder for [`HostContext`] (configuration, per the ambient-stack conventions this crate
/// follows for every component that has more than one meaningful knob).
pub struct HostContextBuilder {
    worker_threads: usize,
    blocking_queue_capacity: usize,
    allocator: Arc<dyn HostAllocator>,
    diagnostic_sink: Box<dyn DiagnosticSink>,
}

impl std::fmt::Debug for HostContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContextBuilder")
            .field("worker_threads", &self.worker_threads)
            .field("blocking_queue_capacity", &self.blocking_queue_capacity)
            .finish_non_exhaustive()
    }
}

impl Default for HostContextBuilder {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            blocking_queue_capacity: 1024,
            allocator: Arc::new(GlobalAllocator),
            diagnostic_sink: Box::new(TracingDiagnosticSink),
        }
    }
}

impl HostContextBuilder {
    /// Sets the number of worker threads backing the non-blocking work queue. Defaults to
    /// [`std::thread::available_parallelism`].
    #[must_use]
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Sets the bounded capacity of the blocking work queue. Defaults to 1024.
    #[must_use]
    pub fn with_blocking_queue_capacity(mut self, capacity: usize) -> Self {
        self.blocking_queue_capacity = capacity;
        self
    }

    /// Overrides the [`HostAllocator`] used for every allocation this context routes, including
    /// `Ref` cells and `AsyncValue`s created through it. Defaults to [`GlobalAllocator`].
    #[must_use]
    pub fn with_allocator(mut self, allocator: impl HostAllocator + 'static) -> Self {
        self.allocator = Arc::new(allocator);
        self
    }

    /// Overrides the [`DiagnosticSink`] that receives emitted errors and caught waiter panics.
    /// Defaults to [`TracingDiagnosticSink`].
    #[must_use]
    pub fn with_diagnostic_sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.diagnostic_sink = Box::new(sink);
        self
    }

    /// Builds the configured `HostContext`.
    ///
    /// # Panics
    ///
    /// Panics if the process already has [`MAX_CONTEXTS`] live `HostContext`s.
    #[must_use]
    pub fn build(self) -> HostContext {
        let queue = Box::new(ThreadPoolWorkQueue::new(
            self.worker_threads.max(1),
            self.blocking_queue_capacity,
        ));
        HostContext::from_parts(self.allocator, queue, self.diagnostic_sink)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn allocate_bytes_and_deallocate_bytes_round_trip() {
        let ctx = HostContext::new();
        // SAFETY: well-formed size/align for a test allocation, deallocated with the same
        // size/align immediately below and never touched again afterward.
        unsafe {
            let ptr = ctx.allocate_bytes(64, 8);
            ptr.as_ptr().write_bytes(0xCD, 64);
            ctx.deallocate_bytes(ptr, 64, 8);
        }
    }

    #[test]
    fn ready_future_is_immediately_concrete() {
        let ctx = HostContext::new();
        assert!(ctx.ready().is_concrete());
    }

    #[test]
    fn cancel_is_first_writer_wins() {
        let ctx = HostContext::new();
        ctx.cancel("first");
        ctx.cancel("second");

        let value = ctx.cancel_value().expect("cancellation installed");
        assert!(value.is_error());
        assert_eq!(value.error().message(), "first");
    }

    #[test]
    fn restart_clears_cancellation() {
        let ctx = HostContext::new();
        ctx.cancel("stop");
        assert!(ctx.cancel_value().is_some());
        ctx.restart();
        assert!(ctx.cancel_value().is_none());
    }

    #[test]
    fn run_when_ready_waits_for_every_value() {
        let ctx = HostContext::new();
        let a = AsyncValue::<u32>::make_unresolved_in(&ctx);
        let b = AsyncValue::<u32>::make_unresolved_in(&ctx);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        ctx.run_when_ready(&[a.clone(), b.clone()], move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        a.set_concrete(1).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        b.set_concrete(2).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_when_ready_with_no_values_runs_synchronously() {
        let ctx = HostContext::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        ctx.run_when_ready::<u32>(&[], move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn await_values_blocks_until_every_value_resolves() {
        let ctx = HostContext::new();
        let a = AsyncValue::<u32>::make_unresolved_in(&ctx);
        let b = AsyncValue::<u32>::make_unresolved_in(&ctx);

        let resolved = Arc::new(AtomicUsize::new(0));
        for (value, n) in [(a.clone(), 1_u32), (b.clone(), 2_u32)] {
            let resolved = Arc::clone(&resolved);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(10));
                resolved.fetch_add(1, Ordering::SeqCst);
                value.set_concrete(n).unwrap();
            });
        }

        ctx.await_values(&[a, b]);
        assert_eq!(resolved.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn await_values_with_no_values_returns_immediately() {
        let ctx = HostContext::new();
        ctx.await_values::<u32>(&[]);
    }

    #[test]
    fn instance_indices_are_distinct() {
        let a = HostContext::new();
        let b = HostContext::new();
        assert_ne!(a.instance_index(), b.instance_index());
    }
}
