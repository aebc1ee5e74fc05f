// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The host allocator interface (component C).
//!
//! The concrete allocation *strategy* (arenas, slab pools, NUMA-local heaps, ...) is explicitly
//! out of scope for this crate - that is the kind of thing a surrounding dataflow runtime swaps in
//! for its workload. What this crate owns is the interface every other component allocates
//! through, plus one default implementation backed by the Rust global allocator so the crate is
//! usable standalone.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// A thread-safe, sized-and-aligned memory allocator.
///
/// Implementations must honor the requested alignment and must be safe to call concurrently from
/// any number of threads. A failure to allocate is treated as fatal by every caller in this crate
/// (see [`HostAllocator::allocate`]) - this mirrors the host execution context's role as the
/// bottom of the stack, where there is no lower layer left to recover into.
pub trait HostAllocator: Send + Sync {
    /// Allocates `size` bytes aligned to `align`.
    ///
    /// # Panics / aborts
    ///
    /// Implementations must abort the process (not merely panic, since a caller may be inside a
    /// `catch_unwind` boundary it does not control) if the allocation cannot be satisfied.
    ///
    /// # Safety
    ///
    /// `align` must be a nonzero power of two and `size` rounded up to `align` must not overflow
    /// `isize`.
    unsafe fn allocate(&self, size: usize, align: usize) -> NonNull<u8>;

    /// Deallocates memory previously returned by [`HostAllocator::allocate`] on the same
    /// allocator instance, with the same `size` and `align` used to allocate it.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by a prior call to `allocate` on `self` with the same `size`
    /// and `align`, and must not be used again afterward.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// A [`HostAllocator`] backed directly by the Rust global allocator (`std::alloc::System` or
/// whatever `#[global_allocator]` the binary installs).
#[derive(Debug, Default)]
pub struct GlobalAllocator;

impl HostAllocator for GlobalAllocator {
    #[cfg_attr(test, mutants::skip)] // Mutations here can only be observed via actual OOM/UB.
    unsafe fn allocate(&self, size: usize, align: usize) -> NonNull<u8> {
        // SAFETY: caller guarantees `align` is a nonzero power of two and the rounded size fits
        // in `isize`, which is exactly what `Layout::from_size_align_unchecked` requires.
        let layout = unsafe { Layout::from_size_align_unchecked(size, align) };

        if size == 0 {
            return NonNull::dangling();
        }

        // SAFETY: `layout` has nonzero size per the check above.
        let raw = unsafe { alloc::alloc(layout) };

        match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        }
    }

    #[cfg_attr(test, mutants::skip)] // Mutations here can only be observed via actual UAF/UB.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if size == 0 {
            return;
        }

        // SAFETY: caller guarantees `ptr`/`size`/`align` match a prior `allocate` call on `self`.
        let layout = unsafe { Layout::from_size_align_unchecked(size, align) };
        // SAFETY: see above - `ptr` was allocated with `layout` by `alloc::alloc`.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_allocation() {
        let allocator = GlobalAllocator;
        // SAFETY: well-formed size/align for a test allocation.
        unsafe {
            let ptr = allocator.allocate(64, 8);
            ptr.as_ptr().write_bytes(0xAB, 64);
            allocator.deallocate(ptr, 64, 8);
        }
    }

    #[test]
    fn zero_sized_allocation_is_dangling_and_safe_to_free() {
        let allocator = GlobalAllocator;
        // SAFETY: zero size is explicitly supported by this implementation.
        unsafe {
            let ptr = allocator.allocate(0, 1);
            allocator.deallocate(ptr, 0, 1);
        }
    }
}
