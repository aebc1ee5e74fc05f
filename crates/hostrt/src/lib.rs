// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A per-process host execution context for dataflow and task-graph runtimes.
//!
//! This crate provides the substrate such a runtime is built on top of, not the runtime itself:
//!
//! - [`Ref<T>`] - intrusive atomic reference counting, optionally routed through a
//!   [`HostContext`]'s allocator (component A).
//! - [`AsyncValue<T>`] - a set-once asynchronous value with waiter continuations and transparent
//!   indirection (component B).
//! - [`HostAllocator`] - the sized-and-aligned allocation interface every allocation in this crate
//!   ultimately goes through (component C).
//! - [`WorkQueue`] - the non-blocking/blocking task submission interface (component D).
//! - [`HostContext`] - binds an allocator, a work queue and a shared-context registry together,
//!   and owns cancellation, join-record scheduling and value-based waiting (component E).
//! - `HostContext::parallel_for` - recursive bisection of an index range across the work queue
//!   (component F).
//! - `HostContext::get_or_create_shared` - a fixed-capacity registry of lazily-constructed,
//!   type-indexed singletons (component G).
//!
//! Concrete scheduling, allocation and NUMA-placement policy are explicitly out of scope - this
//! crate ships one default [`HostAllocator`] and one default [`WorkQueue`] so it is usable
//! standalone, but a real dataflow runtime is expected to supply its own via
//! [`HostContextBuilder::with_allocator`].

#![warn(missing_docs)]

mod allocator;
mod async_value;
mod context;
mod diagnostic;
mod error;
mod non_blocking_thread;
mod parallel_for;
mod refcounted;
mod shared_context;
mod work_queue;

pub use allocator::{GlobalAllocator, HostAllocator};
pub use async_value::AsyncValue;
pub use context::{HostContext, HostContextBuilder};
pub use diagnostic::{Diagnostic, DiagnosticSink, TracingDiagnosticSink};
pub use error::{Error, Result};
pub use refcounted::Ref;
pub use work_queue::{ThreadPoolWorkQueue, WorkQueue};

#[cfg(test)]
mod assertions {
    use static_assertions::assert_impl_all;

    use crate::{AsyncValue, HostContext, HostContextBuilder, Ref, ThreadPoolWorkQueue};

    assert_impl_all!(HostContext: Send, Sync, Clone, std::fmt::Debug);
    assert_impl_all!(HostContextBuilder: std::fmt::Debug);
    assert_impl_all!(Ref<u32>: Send, Sync, Clone, std::fmt::Debug);
    assert_impl_all!(AsyncValue<u32>: Send, Sync);
    assert_impl_all!(ThreadPoolWorkQueue: Send, Sync, std::fmt::Debug);
}
