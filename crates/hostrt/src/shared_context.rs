// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared-context registry (component G).
//!
//! A fixed-capacity table of lazily-constructed, type-indexed singletons, one per
//! [`HostContext`][crate::HostContext]. Each type gets constructed at most once, by exactly one
//! caller, no matter how many threads race to fetch it concurrently - callers that lose the race
//! block on `once_cell::sync::OnceCell` until the winner's factory finishes, then observe the same
//! instance.

use std::any::{Any, TypeId};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::context::HostContext;

/// Hard cap on the number of distinct shared-context types one [`HostContext`] may register.
/// Generous for the handful of singleton services (metrics aggregators, symbol tables, ...) a
/// typical dataflow runtime installs; exceeding it is a sign the registry is being used for
/// something other than process-wide singletons.
const MAX_SHARED_TYPES: usize = 256;

type Slot = (TypeId, Arc<OnceCell<Arc<dyn Any + Send + Sync>>>);

/// The registry backing `HostContext::get_or_create_shared`.
pub(crate) struct SharedContextRegistry {
    slots: Mutex<Vec<Slot>>,
}

impl SharedContextRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Fetches the singleton of type `T`, constructing it via `factory` if this is the first
    /// fetch. `factory` is guaranteed to run at most once, even if multiple threads call this
    /// concurrently for the same `T`, and is handed `host` so it can stash a handle back to the
    /// owning context for later use.
    ///
    /// # Panics
    ///
    /// Aborts (via assertion failure) if this is a new type and the registry has no free slot
    /// left for it - this is a fatal capacity condition, the same as exceeding `MAX_CONTEXTS` at
    /// `HostContext` construction, not a recoverable error.
    pub(crate) fn get_or_create<T, F>(&self, host: &HostContext, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&HostContext) -> T,
    {
        let type_id = TypeId::of::<T>();

        let cell = {
            let mut slots = self.slots.lock();

            if let Some((_, cell)) = slots.iter().find(|(id, _)| *id == type_id) {
                // SAFETY: cloning an `Arc` out from under the lock is sound regardless of whether
                // the cell has been initialized yet; readers only dereference it as `T` after
                // `OnceCell::get_or_init` has returned, which they perform below, outside the lock.
                cell.clone()
            } else {
                assert!(
                    slots.len() < MAX_SHARED_TYPES,
                    "shared-context registry is full (limit is {MAX_SHARED_TYPES} types)"
                );
                let cell = Arc::new(OnceCell::new());
                slots.push((type_id, Arc::clone(&cell)));
                cell
            }
        };

        let value = cell.get_or_init(|| Arc::new(factory(host)) as Arc<dyn Any + Send + Sync>);

        Arc::clone(value)
            .downcast::<T>()
            .unwrap_or_else(|_| unreachable!("slot for this TypeId always holds an Arc<T>"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn constructs_on_first_fetch_and_reuses_afterward() {
        let host = HostContext::new();
        let registry = SharedContextRegistry::new();
        let constructed = Arc::new(AtomicUsize::new(0));

        let constructed_clone = Arc::clone(&constructed);
        let first = registry.get_or_create(&host, move |_host| {
            constructed_clone.fetch_add(1, Ordering::SeqCst);
            42_u32
        });
        let constructed_clone = Arc::clone(&constructed);
        let second = registry.get_or_create(&host, move |_host| {
            constructed_clone.fetch_add(1, Ordering::SeqCst);
            99_u32
        });

        assert_eq!(*first, 42);
        assert_eq!(*second, 42);
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_runs_exactly_once_under_concurrent_fetches() {
        let host = HostContext::new();
        let registry = Arc::new(SharedContextRegistry::new());
        let constructed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let host = host.clone();
                let registry = Arc::clone(&registry);
                let constructed = Arc::clone(&constructed);
                std::thread::spawn(move || {
                    registry.get_or_create(&host, move |_host| {
                        constructed.fetch_add(1, Ordering::SeqCst);
                        String::from("singleton")
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| **r == *"singleton"));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_types_get_distinct_slots() {
        let host = HostContext::new();
        let registry = SharedContextRegistry::new();
        let a = registry.get_or_create(&host, |_host| 1_u32);
        let b = registry.get_or_create(&host, |_host| "hello".to_string());
        assert_eq!(*a, 1);
        assert_eq!(*b, "hello");
    }

    #[test]
    fn factory_receives_the_owning_host_context() {
        let host = HostContext::new();
        let registry = SharedContextRegistry::new();
        let seen_index = registry.get_or_create(&host, |h| h.instance_index());
        assert_eq!(*seen_index, host.instance_index());
    }
}
