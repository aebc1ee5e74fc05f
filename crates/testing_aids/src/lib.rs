// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An unpublished crate containing testing utilities for use within this repo.

#![allow(clippy::panic, clippy::unwrap_used, missing_docs, reason = "Test code")]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::Duration;
use std::{process, thread};

mod macros;

/// If something (whatever) does not happen in a test within this time, the test will fail.
///
/// We are conservative here and allow much time - this is only to break out of infinite loops and
/// deadlocks, not for any situation that is actually expected to take this long.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes a function on the current thread and sets up a watchdog timer that terminates the
/// process if the target function does not complete before [`TEST_TIMEOUT`].
///
/// Intended for tests that exercise blocking operations (`await_all`, `quiesce`, join handles)
/// where a bug could deadlock the test thread instead of merely failing an assertion.
///
/// # Panics
///
/// Panics if the wrapped function panics or the timeout is exceeded.
pub fn execute_or_terminate_process<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let (sender, receiver) = mpsc::channel();

    let watchdog = thread::Builder::new()
        .name("test watchdog".to_string())
        .spawn(move || {
            if receiver.recv_timeout(TEST_TIMEOUT) != Ok(()) {
                eprintln!("Test timed out, terminating process.");
                #[expect(
                    clippy::exit,
                    reason = "test harness is intentionally terminating a test process that cannot continue"
                )]
                // Arbitrary value in the portable range (8 bits), signaling "emergency timeout".
                process::exit(112);
            }
        })
        .unwrap();

    let result = catch_unwind(AssertUnwindSafe(f));

    // We signal "done" regardless of whether the closure panicked - all we care about is timeout.
    sender.send(()).unwrap();
    watchdog.join().unwrap();

    result.unwrap()
}
