// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A thread-local guard against calling blocking [`HostContext`][crate::HostContext] operations
//! (`await_all`, `quiesce`) from a thread that is itself a work queue worker - doing so can
//! deadlock if the outstanding work being waited on can only complete on that very thread.

use std::cell::Cell;

thread_local! {
    static IS_FLAGGED: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as a work queue worker. Called once, at worker-thread startup.
pub(crate) fn flag_current_thread() {
    IS_FLAGGED.with(|flagged| flagged.set(true));
}

/// # Panics
///
/// Panics if the current thread was previously marked with [`flag_current_thread`].
pub(crate) fn assert_not_flagged() {
    IS_FLAGGED.with(|flagged| {
        assert!(
            !flagged.get(),
            "blocking wait (await_all/quiesce) called from a work queue worker thread - this can deadlock"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unflagged_thread_passes_the_assertion() {
        assert_not_flagged();
    }

    #[test]
    fn flagged_thread_fails_the_assertion() {
        std::thread::spawn(|| {
            flag_current_thread();
            let result = std::panic::catch_unwind(assert_not_flagged);
            assert!(result.is_err());
        })
        .join()
        .unwrap();
    }
}
