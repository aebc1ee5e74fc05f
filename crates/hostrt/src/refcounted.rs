// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Intrusive atomic reference counting (component A).
//!
//! [`Ref<T>`] is conceptually an `Arc<T>`, except the payload may optionally be allocated via a
//! [`HostContext`][crate::HostContext]'s allocator instead of the global Rust allocator, and the
//! final release routes deallocation back through whichever allocator provided the memory. This is
//! the building block [`AsyncValue`][crate::AsyncValue] is built on (see `async_value` module).

use std::alloc::Layout;
use std::ptr::{self, NonNull};
use std::sync::atomic::{self, AtomicUsize, Ordering};

use crate::context;

/// Sentinel stored in [`RefCounted::owner_index`] for cells allocated via the global allocator,
/// i.e. not associated with any particular [`HostContext`][crate::HostContext].
const NO_OWNER: u32 = u32::MAX;

#[repr(C)]
pub(crate) struct RefCounted<T> {
    count: AtomicUsize,
    owner_index: u32,
    payload: T,
}

/// An intrusively reference-counted cell holding a `T`.
///
/// Creation yields a refcount of 1. `clone()` increments with relaxed ordering (no other thread's
/// writes need to be observed to justify adding one more reader); the decrement on the final
/// release uses release ordering paired with an acquire fence taken only by the thread that
/// observes the count reach zero, establishing happens-before with every prior release so the
/// destructor runs only after all other owners are done touching the payload.
pub struct Ref<T> {
    ptr: NonNull<RefCounted<T>>,
}

// SAFETY: `Ref<T>` only ever hands out `&T` (shared access) to any number of threads and
// coordinates the final release via an atomic refcount; this is exactly the Send/Sync contract
// `Arc<T>` itself upholds, with the identical bound on `T`.
unsafe impl<T: Send + Sync> Send for Ref<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for Ref<T> {}

impl<T> Ref<T> {
    /// Allocates a new cell from the global Rust allocator, independent of any `HostContext`.
    #[must_use]
    pub fn new(payload: T) -> Self {
        let boxed = Box::new(RefCounted {
            count: AtomicUsize::new(1),
            owner_index: NO_OWNER,
            payload,
        });

        Self {
            // SAFETY: `Box::into_raw` never returns a null pointer.
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) },
        }
    }

    /// Allocates a new cell via `owner`'s allocator, recording `owner`'s instance index so that
    /// the final release can route deallocation back through that same context.
    pub(crate) fn new_in(owner: &crate::HostContext, payload: T) -> Self {
        let layout = Layout::new::<RefCounted<T>>();

        // SAFETY: `layout` has nonzero alignment and does not overflow `isize`, as required by
        // `allocate_bytes`; it was built from a real Rust type via `Layout::new`.
        let raw = unsafe { owner.allocate_bytes(layout.size(), layout.align()) };
        let typed: NonNull<RefCounted<T>> = raw.cast();

        // SAFETY: `raw` is freshly allocated, sized and aligned for `RefCounted<T>`, and not
        // aliased by anything else yet.
        unsafe {
            ptr::write(
                typed.as_ptr(),
                RefCounted {
                    count: AtomicUsize::new(1),
                    owner_index: owner.instance_index(),
                    payload,
                },
            );
        }

        Self { ptr: typed }
    }

    fn inner(&self) -> &RefCounted<T> {
        // SAFETY: `self.ptr` is valid for reads for as long as this `Ref` (or any clone of it)
        // exists, since the refcount only reaches zero after the last clone is dropped.
        unsafe { self.ptr.as_ref() }
    }

    /// The number of live `Ref`s sharing this cell, observed with acquire ordering.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.inner().count.load(Ordering::Acquire)
    }

    /// Consumes this `Ref` without releasing it, handing the caller a raw pointer that still owns
    /// one count. Used by [`HostContext`][crate::HostContext] to park a cancellation error behind
    /// an `AtomicPtr` - `AtomicPtr` has no destructor of its own, so ownership has to be tracked by
    /// hand from here until [`Ref::from_raw`] reclaims it.
    pub(crate) fn into_raw(self) -> NonNull<RefCounted<T>> {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }

    /// Reconstructs a `Ref` that was previously disarmed via [`Ref::into_raw`], taking over its
    /// owned count.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `Ref::<T>::into_raw` and must not still be reachable through any
    /// other live `Ref` or raw slot after this call.
    pub(crate) unsafe fn from_raw(ptr: NonNull<RefCounted<T>>) -> Self {
        Self { ptr }
    }

    /// Builds a new `Ref` sharing a cell reachable through a raw pointer without taking over
    /// existing ownership of it, by incrementing the refcount and keeping the slot that handed us
    /// `ptr` intact. Used to read a cancellation slot without clearing it.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a `RefCounted<T>` that is kept alive independently of the `Ref` this
    /// call produces (e.g. by an `AtomicPtr` slot that is not concurrently cleared out from under
    /// the caller).
    pub(crate) unsafe fn clone_from_raw(ptr: NonNull<RefCounted<T>>) -> Self {
        // SAFETY: caller guarantees `ptr` is a live `RefCounted<T>`.
        unsafe {
            ptr.as_ref().count.fetch_add(1, Ordering::Relaxed);
        }
        Self { ptr }
    }
}

impl<T> std::ops::Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().payload
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        // Relaxed: we already hold a valid reference, so no prior-release synchronization is
        // needed to justify handing out one more. Only the *last* decrement needs to synchronize.
        let previous = self.inner().count.fetch_add(1, Ordering::Relaxed);
        assert!(
            previous < usize::MAX / 2,
            "Ref refcount overflowed - this should be unreachable in any real program"
        );

        Self { ptr: self.ptr }
    }
}

impl<T> Drop for Ref<T> {
    #[cfg_attr(test, mutants::skip)] // Critical primitive - mutating this causes UAF/leak failures.
    fn drop(&mut self) {
        if self.inner().count.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }

        // Acquire fence taken only by the thread that sees the count reach zero, pairing with the
        // release on every decrement (including this one) to guarantee the payload's destructor
        // runs after all other owners are finished touching it.
        atomic::fence(Ordering::Acquire);

        let owner_index = self.inner().owner_index;
        let layout = Layout::new::<RefCounted<T>>();

        // SAFETY: we are the last owner (count reached zero) and have just fenced against every
        // prior release, so it is safe to run the destructor and reclaim the memory. No other
        // `Ref` can read `self.ptr` from this point on.
        unsafe {
            ptr::drop_in_place(ptr::addr_of_mut!((*self.ptr.as_ptr()).payload));

            if owner_index == NO_OWNER || !context::reclaim(owner_index, self.ptr.cast(), layout) {
                drop(Box::from_raw(self.ptr.as_ptr().cast::<std::mem::MaybeUninit<RefCounted<T>>>()));
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ref")
            .field("strong_count", &self.strong_count())
            .field("payload", &self.inner().payload)
            .finish()
    }
}
