// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` type for host execution context operations
/// that return a host runtime [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the host execution context.
///
/// This is an umbrella type for the failure modes the runtime can report to a caller. Programming
/// errors such as reading an unresolved [`AsyncValue`][crate::AsyncValue] or resolving one twice
/// are not represented here - they panic directly, since by contract they should never occur in
/// correct code and a `Result` would only encourage callers to paper over the bug. Likewise,
/// exceeding a fixed capacity (the maximum number of live [`HostContext`][crate::HostContext]s, or
/// of registered shared-context types) is fatal and panics rather than appearing here - per spec,
/// both are abort conditions, not recoverable ones.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A blocking task could not be accepted onto the blocking work queue because it was full and
    /// queuing was disallowed by the caller.
    #[error("blocking task queue rejected the task: {0}")]
    Rejected(String),

    /// We are re-packaging an error we obtained from some downstream mechanism without adding
    /// further detail at this layer.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
