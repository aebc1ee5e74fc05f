// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

/// A diagnostic describing a failure surfaced to a [`HostContext`][crate::HostContext] caller.
///
/// The `location` field is intentionally opaque to this crate - the surrounding dataflow runtime
/// is expected to attach its own symbolic source-location or op-trace encoding here, which this
/// crate neither interprets nor formats.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    message: String,
    location: Option<Arc<dyn fmt::Debug + Send + Sync>>,
}

impl Diagnostic {
    /// Creates a diagnostic carrying only a message, with no location information attached.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Creates a diagnostic carrying a message and an opaque location value.
    #[must_use]
    pub fn with_location(message: impl Into<String>, location: Arc<dyn fmt::Debug + Send + Sync>) -> Self {
        Self {
            message: message.into(),
            location: Some(location),
        }
    }

    /// The diagnostic's human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The opaque location attached to this diagnostic, if any.
    #[must_use]
    pub fn location(&self) -> Option<&(dyn fmt::Debug + Send + Sync)> {
        self.location.as_deref()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Receives diagnostics emitted by a [`HostContext`][crate::HostContext] (via `emit_error`) or by
/// panics caught while running [`AsyncValue`][crate::AsyncValue] waiters.
///
/// Installed once at `HostContext` construction. May be called from any thread, concurrently with
/// itself, since emission can originate from any worker.
pub trait DiagnosticSink: Send + Sync {
    /// Handles one diagnostic. Must not block for long, as this may run on a worker thread in the
    /// middle of resolving a waiter chain.
    fn emit(&self, diagnostic: &Diagnostic);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&Diagnostic) + Send + Sync,
{
    fn emit(&self, diagnostic: &Diagnostic) {
        self(diagnostic);
    }
}

/// A [`DiagnosticSink`] that only forwards diagnostics to `tracing`, for callers that have no
/// more specific sink to install.
#[derive(Debug, Default)]
pub struct TracingDiagnosticSink;

impl DiagnosticSink for TracingDiagnosticSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        tracing::event!(tracing::Level::ERROR, message = %diagnostic.message(), "diagnostic emitted");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn new_carries_a_message_and_no_location() {
        let diagnostic = Diagnostic::new("boom");
        assert_eq!(diagnostic.message(), "boom");
        assert!(diagnostic.location().is_none());
        assert_eq!(diagnostic.to_string(), "boom");
    }

    #[test]
    fn with_location_carries_both() {
        let diagnostic = Diagnostic::with_location("boom", Arc::new(42_u32));
        assert_eq!(diagnostic.message(), "boom");
        assert!(diagnostic.location().is_some());
    }

    #[test]
    fn closures_implement_diagnostic_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sink = move |diagnostic: &Diagnostic| {
            seen_clone.lock().unwrap().push(diagnostic.message().to_string());
        };

        sink.emit(&Diagnostic::new("first"));
        sink.emit(&Diagnostic::new("second"));

        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }
}
