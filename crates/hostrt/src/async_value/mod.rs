// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Set-once asynchronous values (component B).
//!
//! An [`AsyncValue<T>`] starts in one of two "not yet resolved" shapes - `Unresolved` (a plain
//! placeholder) or `Indirect` (a placeholder that will later be pointed, once, at whichever value
//! actually ends up producing the result) - and resolves exactly once into either `Concrete(T)` or
//! `Error`. Resolution flushes an intrusive LIFO stack of waiters registered via
//! [`AsyncValue::and_then`]; each waiter is a plain zero-argument callable, run synchronously by
//! whichever thread performs the resolution (which may be the thread that called `set_concrete`,
//! or, for a value already resolved by the time `and_then` runs, the caller of `and_then` itself).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::context::{self, NO_OWNER_INDEX};
use crate::diagnostic::Diagnostic;
use crate::error::{Error, Result};
use crate::refcounted::Ref;

const TAG_PENDING: u8 = 0;
const TAG_WRITING: u8 = 1;
const TAG_CONCRETE: u8 = 2;
const TAG_ERROR: u8 = 3;

/// A zero-argument continuation run exactly once when the value it is attached to resolves.
type Waiter = Box<dyn FnOnce() + Send>;

enum Payload<T> {
    Concrete(T),
    Error(Diagnostic),
    /// Set only on a value created via [`AsyncValue::make_indirect`] once its eventual producer
    /// has itself resolved. Always points at a terminal (non-`Forwarded`) value - chains collapse
    /// at the moment a forward is installed, so reads never need to walk more than one hop.
    Forwarded(Ref<AsyncValue<T>>),
}

/// A set-once asynchronous value.
///
/// `resolved_tag` is the single source of truth for whether (and how) this value has resolved,
/// transitioned with one compare-exchange from `TAG_PENDING` to `TAG_WRITING` (claiming the
/// exclusive right to initialize the payload) and finally published with a release store to its
/// terminal tag. Readers take the fast, wait-free path of an acquire load of `resolved_tag`
/// followed - only once it reports a terminal state - by a read of `payload`, which is never
/// written again after that point.
pub struct AsyncValue<T> {
    owner_index: u32,
    indirect: bool,
    forwarded: AtomicBool,
    resolved_tag: AtomicU8,
    payload: UnsafeCell<MaybeUninit<Payload<T>>>,
    waiters: Mutex<Option<Vec<Waiter>>>,
}

// SAFETY: all access to `payload` is gated by the `resolved_tag`/`waiters` protocol described
// above, which establishes the same happens-before relationships a `Mutex<T>` would; `T` crossing
// threads is exactly what `get()` does, hence the `Send` bound (no extra `Sync` bound is needed
// since we never hand out more than shared access to the payload once written).
unsafe impl<T: Send> Send for AsyncValue<T> {}
// SAFETY: see above.
unsafe impl<T: Send> Sync for AsyncValue<T> {}

impl<T> AsyncValue<T> {
    fn construct(owner_index: u32, indirect: bool, tag: u8, payload: Option<Payload<T>>) -> Self {
        Self {
            owner_index,
            indirect,
            forwarded: AtomicBool::new(false),
            resolved_tag: AtomicU8::new(tag),
            payload: UnsafeCell::new(match payload {
                Some(p) => MaybeUninit::new(p),
                None => MaybeUninit::uninit(),
            }),
            waiters: Mutex::new(if tag == TAG_PENDING { Some(Vec::new()) } else { None }),
        }
    }

    /// Creates an unresolved value, not associated with any `HostContext`.
    #[must_use]
    pub fn make_unresolved() -> Ref<Self> {
        Ref::new(Self::construct(NO_OWNER_INDEX, false, TAG_PENDING, None))
    }

    /// Creates an already-resolved value holding `value`, not associated with any `HostContext`.
    #[must_use]
    pub fn make_available(value: T) -> Ref<Self> {
        Ref::new(Self::construct(NO_OWNER_INDEX, false, TAG_CONCRETE, Some(Payload::Concrete(value))))
    }

    /// Creates an already-resolved, errored value, not associated with any `HostContext`.
    #[must_use]
    pub fn make_error(diagnostic: Diagnostic) -> Ref<Self> {
        Ref::new(Self::construct(NO_OWNER_INDEX, false, TAG_ERROR, Some(Payload::Error(diagnostic))))
    }

    /// Creates an indirect value, not associated with any `HostContext`. Must be pointed at its
    /// eventual producer with [`AsyncValue::forward_to`] exactly once.
    #[must_use]
    pub fn make_indirect() -> Ref<Self> {
        Ref::new(Self::construct(NO_OWNER_INDEX, true, TAG_PENDING, None))
    }

    pub(crate) fn make_unresolved_in(owner: &crate::HostContext) -> Ref<Self> {
        Ref::new_in(owner, Self::construct(owner.instance_index(), false, TAG_PENDING, None))
    }

    pub(crate) fn make_available_in(owner: &crate::HostContext, value: T) -> Ref<Self> {
        Ref::new_in(
            owner,
            Self::construct(owner.instance_index(), false, TAG_CONCRETE, Some(Payload::Concrete(value))),
        )
    }

    pub(crate) fn make_error_in(owner: &crate::HostContext, diagnostic: Diagnostic) -> Ref<Self> {
        Ref::new_in(
            owner,
            Self::construct(owner.instance_index(), false, TAG_ERROR, Some(Payload::Error(diagnostic))),
        )
    }

    pub(crate) fn make_indirect_in(owner: &crate::HostContext) -> Ref<Self> {
        Ref::new_in(owner, Self::construct(owner.instance_index(), true, TAG_PENDING, None))
    }

    /// Whether this value has resolved at all, to either a concrete value or an error. Wait-free:
    /// a single acquire load.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.resolved_tag.load(Ordering::Acquire), TAG_CONCRETE | TAG_ERROR)
    }

    /// Whether this value has resolved to an error (directly, or via a collapsed `Indirect` chain
    /// whose terminal value is an error). Wait-free.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.resolved_tag.load(Ordering::Acquire) == TAG_ERROR
    }

    /// Whether this value has resolved to a concrete value. Wait-free.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.resolved_tag.load(Ordering::Acquire) == TAG_CONCRETE
    }

    /// The resolved value.
    ///
    /// # Panics
    ///
    /// Panics if this value is not yet available, or resolved to an error instead.
    #[must_use]
    pub fn get(&self) -> &T {
        assert!(self.is_available(), "get() called on an unresolved AsyncValue");
        match self.payload_ref() {
            Payload::Concrete(value) => value,
            Payload::Forwarded(target) => target.get(),
            Payload::Error(_) => panic!("get() called on an AsyncValue that resolved to an error"),
        }
    }

    /// The diagnostic this value resolved to.
    ///
    /// # Panics
    ///
    /// Panics if this value is not yet available, or resolved to a concrete value instead.
    #[must_use]
    pub fn error(&self) -> &Diagnostic {
        assert!(self.is_available(), "error() called on an unresolved AsyncValue");
        match self.payload_ref() {
            Payload::Error(diagnostic) => diagnostic,
            Payload::Forwarded(target) => target.error(),
            Payload::Concrete(_) => panic!("error() called on an AsyncValue that resolved concrete"),
        }
    }

    fn payload_ref(&self) -> &Payload<T> {
        // SAFETY: the caller has already confirmed `resolved_tag` is a terminal state via
        // `is_available`. The payload write happened-before that observation (it is sequenced
        // before the release store that set the terminal tag, and the load here is an acquire of
        // that same atomic), and it is never mutated again, so a shared read is sound.
        unsafe { (*self.payload.get()).assume_init_ref() }
    }

    /// Registers `waiter` to run once this value resolves. If it has already resolved, `waiter`
    /// runs synchronously on the calling thread before this call returns. Otherwise it is pushed
    /// onto the LIFO waiter stack and runs on whichever thread eventually resolves this value.
    ///
    /// A panic inside `waiter` is caught and reported through the owning context's diagnostic
    /// sink (or to `tracing` if this value has no owning context); the remaining waiters, if any,
    /// still run.
    pub fn and_then<F>(&self, waiter: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_available() {
            self.run_waiter(Box::new(waiter));
            return;
        }

        let mut guard = self.waiters.lock();
        match guard.as_mut() {
            Some(list) => {
                list.push(Box::new(waiter));
                return;
            }
            None => {}
        }
        drop(guard);

        // Resolved between our fast-path check and taking the lock; the resolver already drained
        // (or is about to drain) the waiter list without seeing us, so we must run it ourselves.
        self.run_waiter(Box::new(waiter));
    }

    fn run_waiter(&self, waiter: Waiter) {
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(waiter)) {
            context::report_waiter_panic(self.owner_index, payload);
        }
    }

    fn try_begin_resolve(&self) -> bool {
        self.resolved_tag
            .compare_exchange(TAG_PENDING, TAG_WRITING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish_resolve(&self, payload: Payload<T>, final_tag: u8) {
        // SAFETY: `try_begin_resolve` just won the Pending -> Writing compare-exchange, so we are
        // the only thread with the right to write `payload` until we publish `final_tag` below.
        unsafe {
            (*self.payload.get()).write(payload);
        }

        self.resolved_tag.store(final_tag, Ordering::Release);

        let waiters = self.waiters.lock().take();
        if let Some(mut waiters) = waiters {
            while let Some(waiter) = waiters.pop() {
                self.run_waiter(waiter);
            }
        }
    }

    fn double_resolve() -> Result<()> {
        if cfg!(debug_assertions) {
            panic!("double resolution of an AsyncValue");
        }
        Err(Error::Other(
            "double resolution of an AsyncValue"
                .to_string()
                .into(),
        ))
    }

    /// Resolves this value to `value`.
    ///
    /// # Errors
    ///
    /// In debug builds this instead panics; in release builds it returns
    /// [`Error::Other`][crate::Error::Other] if this value has already resolved.
    pub fn set_concrete(&self, value: T) -> Result<()> {
        if !self.try_begin_resolve() {
            return Self::double_resolve();
        }
        self.finish_resolve(Payload::Concrete(value), TAG_CONCRETE);
        Ok(())
    }

    /// Constructs the resolved value in place from `build`, then resolves this value to it.
    ///
    /// # Errors
    ///
    /// Same as [`AsyncValue::set_concrete`].
    pub fn emplace<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce() -> T,
    {
        if !self.try_begin_resolve() {
            return Self::double_resolve();
        }
        self.finish_resolve(Payload::Concrete(build()), TAG_CONCRETE);
        Ok(())
    }

    /// Resolves this value to an error.
    ///
    /// # Errors
    ///
    /// Same as [`AsyncValue::set_concrete`].
    pub fn set_error(&self, diagnostic: Diagnostic) -> Result<()> {
        if !self.try_begin_resolve() {
            return Self::double_resolve();
        }
        self.finish_resolve(Payload::Error(diagnostic), TAG_ERROR);
        Ok(())
    }
}

impl<T: Send + Sync + 'static> AsyncValue<T> {
    /// Points an indirect value (created via [`AsyncValue::make_indirect`]) at `other`, which will
    /// go on to produce the actual result. Once `other` resolves, `this` adopts its resolved state
    /// - transparently, as if `this` had been `other` all along. If `other` is itself indirect and
    /// forwarded further before it resolves, the chain collapses to the eventual terminal value at
    /// the moment it resolves, so later reads through `this` never pay for more than one hop.
    ///
    /// # Panics
    ///
    /// Panics if `this` was not created via `make_indirect`, or if `forward_to` is called more
    /// than once on the same value.
    pub fn forward_to(this: &Ref<Self>, other: Ref<Self>) {
        assert!(this.indirect, "forward_to called on a non-indirect AsyncValue");
        let already_forwarded = this.forwarded.swap(true, Ordering::AcqRel);
        assert!(!already_forwarded, "forward_to called twice on the same indirect AsyncValue");

        let target = this.clone();
        let captured = other.clone();
        other.and_then(move || {
            let terminal = Self::terminal_of(&captured);
            let tag = if terminal.is_error() { TAG_ERROR } else { TAG_CONCRETE };
            if target.try_begin_resolve() {
                target.finish_resolve(Payload::Forwarded(terminal), tag);
            }
        });
    }

    /// Follows a `Forwarded` link to the terminal (non-forwarded) value it ultimately points at.
    /// `v` must already be resolved - by construction, `Forwarded` links are only ever installed
    /// pointing directly at a terminal value (see `forward_to`), so this needs at most one hop.
    fn terminal_of(v: &Ref<Self>) -> Ref<Self> {
        debug_assert!(v.is_available());
        match v.payload_ref() {
            Payload::Forwarded(target) => target.clone(),
            Payload::Concrete(_) | Payload::Error(_) => v.clone(),
        }
    }
}

impl<T> Drop for AsyncValue<T> {
    fn drop(&mut self) {
        let tag = *self.resolved_tag.get_mut();
        if matches!(tag, TAG_CONCRETE | TAG_ERROR) {
            // SAFETY: `&mut self` is exclusive access; a terminal tag means `payload` was written
            // exactly once and never again.
            unsafe {
                std::ptr::drop_in_place((*self.payload.get()).as_mut_ptr());
            }
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("AsyncValue");
        match self.resolved_tag.load(Ordering::Acquire) {
            TAG_PENDING => debug.field("state", &"Unresolved"),
            TAG_WRITING => debug.field("state", &"Writing"),
            TAG_CONCRETE => debug.field("state", &"Concrete"),
            TAG_ERROR => debug.field("state", &"Error"),
            _ => unreachable!("resolved_tag only ever holds one of the four tags above"),
        };
        debug.finish()
    }
}
