//! Request-scoped execution context.
//!
//! A [`RequestContext`] is an immutable carrier of per-request metadata that is
//! threaded explicitly through every call in a request's chain:
//!
//! - **Attachments**: typed values overlaid with [`RequestContext::with_value`].
//!   The Rust type of the value is its key, so unrelated attachments cannot
//!   collide and retrieval is checked at compile time.
//! - **Deadline**: optional absolute [`Instant`]. Derived contexts can only
//!   tighten it, never extend it.
//! - **Cancellation**: a one-way latch shared by a derivation and everything
//!   derived from it. Set by the owning [`CancelHandle`] or once the deadline
//!   elapses.
//! - **Start time**: optional [`Instant`] used to report elapsed time.
//!
//! Deriving never mutates the parent. Cancelling a child never affects its
//! parent or siblings.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::types::{RequestId, UserId};

// ---------------------------------------------------------------------------
// ContextError
// ---------------------------------------------------------------------------

/// Terminal outcome of a context that is no longer active.
///
/// This is an expected result of any context-consuming operation, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    /// The owner cancelled the context explicitly.
    #[error("context canceled")]
    Cancelled,
    /// The context's deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

const ACTIVE: u8 = 0;
const CANCELLED: u8 = 1;
const DEADLINE_EXCEEDED: u8 = 2;

impl ContextError {
    fn encode(self) -> u8 {
        match self {
            Self::Cancelled => CANCELLED,
            Self::DeadlineExceeded => DEADLINE_EXCEEDED,
        }
    }

    fn decode(raw: u8) -> Option<Self> {
        match raw {
            CANCELLED => Some(Self::Cancelled),
            DEADLINE_EXCEEDED => Some(Self::DeadlineExceeded),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// One link of the attachment overlay. Lookups walk toward the root.
struct ValueNode {
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueNode>>,
}

// ---------------------------------------------------------------------------
// CancelState
// ---------------------------------------------------------------------------

/// Shared latch for one cancellable derivation.
///
/// `reason` only ever moves away from `ACTIVE`. Children are held weakly and
/// are latched eagerly when this state latches.
struct CancelState {
    reason: AtomicU8,
    /// Effective deadline: the minimum of this derivation's and all ancestors'.
    deadline: Option<Instant>,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn new(parent: Option<&Arc<CancelState>>, deadline: Option<Instant>) -> Arc<Self> {
        let inherited = parent.and_then(|p| p.deadline);
        let effective = match (inherited, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let state = Arc::new(Self {
            reason: AtomicU8::new(ACTIVE),
            deadline: effective,
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        });

        if let Some(parent) = parent {
            // The parent's latch is checked under its children lock, so a
            // concurrent cancel either sees this child or we see its latch.
            let mut children = parent.children.lock();
            if let Some(reason) = parent.latched() {
                drop(children);
                state.latch(reason);
            } else {
                children.retain(|child| child.strong_count() > 0);
                children.push(Arc::downgrade(&state));
            }
        }

        state
    }

    fn latched(&self) -> Option<ContextError> {
        ContextError::decode(self.reason.load(Ordering::Acquire))
    }

    /// Latches `reason` unless already latched. Returns `true` on the first call.
    ///
    /// A cancel that arrives after the deadline has passed latches
    /// `DeadlineExceeded`, whether or not anyone observed the deadline first.
    fn latch(&self, reason: ContextError) -> bool {
        let reason = match self.deadline {
            Some(deadline)
                if reason == ContextError::Cancelled && Instant::now() >= deadline =>
            {
                ContextError::DeadlineExceeded
            }
            _ => reason,
        };

        if self
            .reason
            .compare_exchange(ACTIVE, reason.encode(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.latch(reason);
            }
        }
        true
    }

    /// Reads the latch, latching `DeadlineExceeded` first if the deadline has passed.
    fn observe(&self) -> Option<ContextError> {
        if let Some(reason) = self.latched() {
            return Some(reason);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.latch(ContextError::DeadlineExceeded);
                self.latched()
            }
            _ => None,
        }
    }

    async fn wait(&self) -> ContextError {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a latch between the check and the
            // await still wakes us.
            notified.as_mut().enable();

            if let Some(reason) = self.observe() {
                return reason;
            }

            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = notified.as_mut() => {}
                        () = tokio::time::sleep_until(deadline) => {
                            self.latch(ContextError::DeadlineExceeded);
                        }
                    }
                }
                None => notified.await,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CancelHandle
// ---------------------------------------------------------------------------

/// Owner-side handle of a cancellable derivation.
///
/// Cancelling is idempotent. The handle cancels its context when dropped, so
/// the derivation is released on every exit path of the scope that owns it.
#[must_use = "dropping a CancelHandle cancels its context immediately"]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Latches the context (and everything derived from it) as cancelled.
    ///
    /// Latches `DeadlineExceeded` instead if the deadline has already passed.
    /// Has no effect if the context already finished for any reason.
    pub fn cancel(&self) {
        self.state.latch(ContextError::Cancelled);
    }

    /// Returns `true` once the context is cancelled or its deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.observe().is_some()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("deadline", &self.state.deadline)
            .field("reason", &self.state.latched())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Per-request carrier of attachments, deadline, cancellation and start time.
///
/// Cloning is cheap and clones observe the same cancellation latch. The
/// default value is the background context: no attachments, no deadline,
/// never cancelled.
#[derive(Clone, Default)]
pub struct RequestContext {
    values: Option<Arc<ValueNode>>,
    cancel: Option<Arc<CancelState>>,
    start: Option<Instant>,
}

impl RequestContext {
    /// Returns an empty root context.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a child that resolves `T` to `value` and delegates every other
    /// type to `self`.
    #[must_use]
    pub fn with_value<T>(&self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            values: Some(Arc::new(ValueNode {
                value: Box::new(value),
                parent: self.values.clone(),
            })),
            cancel: self.cancel.clone(),
            start: self.start,
        }
    }

    /// Looks up the nearest attachment of type `T`.
    #[must_use]
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        let mut node = self.values.as_deref();
        while let Some(current) = node {
            if let Some(value) = current.value.downcast_ref::<T>() {
                return Some(value);
            }
            node = current.parent.as_deref();
        }
        None
    }

    /// Returns the attached [`RequestId`], if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.value::<RequestId>()
    }

    /// Returns the attached [`UserId`], if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.value::<UserId>()
    }

    /// Returns a child whose start time is `start`.
    #[must_use]
    pub fn with_start_time(&self, start: Instant) -> Self {
        Self {
            values: self.values.clone(),
            cancel: self.cancel.clone(),
            start: Some(start),
        }
    }

    /// Returns the start time, if one was set.
    #[must_use]
    pub fn start_time(&self) -> Option<Instant> {
        self.start
    }

    /// Time since the start time, or `None` if no start time was set.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.start.map(|start| Instant::now().saturating_duration_since(start))
    }

    /// Returns a cancellable child and the handle that owns it.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        self.derive_cancellable(None)
    }

    /// Returns a child whose deadline is `min(self.deadline(), deadline)`.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        self.derive_cancellable(Some(deadline))
    }

    /// Returns a child whose deadline is `timeout` from now, bounded by the
    /// parent's deadline.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        let deadline = Instant::now().checked_add(timeout);
        self.derive_cancellable(deadline)
    }

    fn derive_cancellable(&self, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let state = CancelState::new(self.cancel.as_ref(), deadline);
        let child = Self {
            values: self.values.clone(),
            cancel: Some(Arc::clone(&state)),
            start: self.start,
        };
        (child, CancelHandle { state })
    }

    /// Effective deadline, if any ancestor set one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.cancel.as_ref().and_then(|state| state.deadline)
    }

    /// Time left until the deadline. `Some(Duration::ZERO)` once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Why the context stopped, or `None` while it is still active.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        self.cancel.as_ref().and_then(|state| state.observe())
    }

    /// Returns `true` once the context is cancelled for any reason.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// Returns `true` once the context stopped because its deadline elapsed.
    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        self.err() == Some(ContextError::DeadlineExceeded)
    }

    /// Cancellation checkpoint for use between units of work.
    ///
    /// # Errors
    ///
    /// Returns the [`ContextError`] once the context is no longer active.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline elapses.
    ///
    /// Never resolves for a context without a cancellable ancestor.
    pub async fn cancelled(&self) -> ContextError {
        match &self.cancel {
            Some(state) => state.wait().await,
            None => std::future::pending().await,
        }
    }

    /// Runs `work` unless the context finishes first.
    ///
    /// # Errors
    ///
    /// Returns the [`ContextError`] if the context is already finished or
    /// finishes before `work` completes. Cancellation wins a tie.
    pub async fn run_until_cancelled<F>(&self, work: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.cancelled() => Err(err),
            output = work => Ok(output),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id())
            .field("user_id", &self.user_id())
            .field("deadline", &self.deadline())
            .field("err", &self.cancel.as_ref().and_then(|s| s.latched()))
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tag(&'static str);

    #[test]
    fn background_is_empty_and_active() {
        let ctx = RequestContext::background();
        assert!(ctx.value::<Tag>().is_none());
        assert!(ctx.deadline().is_none());
        assert!(ctx.elapsed().is_none());
        assert!(!ctx.is_cancelled());
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn derived_resolves_user_and_sibling_does_not() {
        let root = RequestContext::background();
        let with_user = root.with_value(UserId::from("abc"));
        let sibling = root.with_value(Tag("sibling"));

        assert_eq!(with_user.user_id().map(UserId::as_str), Some("abc"));
        assert!(sibling.user_id().is_none());
        assert!(root.user_id().is_none());
    }

    #[test]
    fn nearest_attachment_shadows_ancestor() {
        let root = RequestContext::background().with_value(Tag("outer"));
        let inner = root.with_value(Tag("inner"));
        assert_eq!(inner.value::<Tag>(), Some(&Tag("inner")));
        assert_eq!(root.value::<Tag>(), Some(&Tag("outer")));
    }

    #[test]
    fn values_survive_cancellable_derivation() {
        let root = RequestContext::background().with_value(Tag("kept"));
        let (child, _handle) = root.with_cancel();
        assert_eq!(child.value::<Tag>(), Some(&Tag("kept")));
    }

    #[test]
    fn double_cancel_is_idempotent() {
        let (ctx, handle) = RequestContext::background().with_cancel();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
        assert!(!ctx.deadline_exceeded());
    }

    #[test]
    fn dropping_handle_cancels() {
        let (ctx, handle) = RequestContext::background().with_cancel();
        drop(handle);
        assert_eq!(ctx.check(), Err(ContextError::Cancelled));
    }

    #[test]
    fn child_cancel_leaves_parent_and_sibling_active() {
        let (parent, _parent_handle) = RequestContext::background().with_cancel();
        let (child, child_handle) = parent.with_cancel();
        let (sibling, _sibling_handle) = parent.with_cancel();

        child_handle.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());
    }

    #[test]
    fn parent_cancel_reaches_existing_and_later_descendants() {
        let (parent, handle) = RequestContext::background().with_cancel();
        let (before, _before_handle) = parent.with_cancel();
        let value_child = parent.with_value(Tag("x"));

        handle.cancel();
        let (after, _after_handle) = parent.with_cancel();

        assert!(before.is_cancelled());
        assert!(value_child.is_cancelled());
        assert_eq!(after.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn derived_deadline_never_extends_parent() {
        let now = Instant::now();
        let (parent, _p) = RequestContext::background().with_deadline(now + Duration::from_secs(1));
        let (child, _c) = parent.with_deadline(now + Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());

        let (tighter, _t) = parent.with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_observes_deadline_exceeded() {
        let (ctx, _handle) = RequestContext::background().with_timeout(Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(ctx.deadline_exceeded());
        assert_eq!(ctx.check(), Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_cancelled_returns_error_instead_of_result() {
        let (ctx, _handle) = RequestContext::background().with_timeout(Duration::from_millis(50));

        let result = ctx
            .run_until_cancelled(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "done"
            })
            .await;

        assert_eq!(result, Err(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_cancelled_passes_through_fast_work() {
        let (ctx, _handle) = RequestContext::background().with_timeout(Duration::from_millis(500));
        let result = ctx.run_until_cancelled(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn cancelled_wakes_on_explicit_cancel() {
        let (ctx, handle) = RequestContext::background().with_cancel();
        let (grandchild, _g) = ctx.with_cancel();

        let waiter = tokio::spawn(async move { grandchild.cancelled().await });
        tokio::task::yield_now().await;
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), ContextError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wakes_at_inherited_deadline() {
        let (parent, _p) = RequestContext::background().with_timeout(Duration::from_millis(30));
        let (child, _c) = parent.with_cancel();

        let err = child.cancelled().await;

        assert_eq!(err, ContextError::DeadlineExceeded);
        assert!(parent.deadline_exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn first_reason_wins() {
        let (ctx, handle) = RequestContext::background().with_timeout(Duration::from_millis(10));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
        assert!(!ctx.deadline_exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn release_after_unobserved_deadline_reports_deadline() {
        let (ctx, handle) = RequestContext::background().with_timeout(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;

        drop(handle);

        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert!(ctx.deadline_exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancel_after_child_deadline_reports_deadline() {
        let (parent, parent_handle) = RequestContext::background().with_cancel();
        let (child, _child_handle) = parent.with_timeout(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;

        parent_handle.cancel();

        assert_eq!(parent.err(), Some(ContextError::Cancelled));
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down_to_zero() {
        assert_eq!(RequestContext::background().remaining(), None);

        let (ctx, _handle) = RequestContext::background().with_timeout(Duration::from_millis(100));
        assert_eq!(ctx.remaining(), Some(Duration::from_millis(100)));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(ctx.remaining(), Some(Duration::from_millis(60)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_tracks_start_time() {
        let ctx = RequestContext::background().with_start_time(Instant::now());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(ctx.elapsed() >= Some(Duration::from_millis(25)));
    }

    // -- properties ---------------------------------------------------------

    #[derive(Debug, PartialEq)]
    struct K0(u32);
    #[derive(Debug, PartialEq)]
    struct K1(u32);
    #[derive(Debug, PartialEq)]
    struct K2(u32);
    #[derive(Debug, PartialEq)]
    struct K3(u32);

    fn attach(ctx: &RequestContext, key: u8, value: u32) -> RequestContext {
        match key % 4 {
            0 => ctx.with_value(K0(value)),
            1 => ctx.with_value(K1(value)),
            2 => ctx.with_value(K2(value)),
            _ => ctx.with_value(K3(value)),
        }
    }

    fn lookup(ctx: &RequestContext, key: u8) -> Option<u32> {
        match key % 4 {
            0 => ctx.value::<K0>().map(|k| k.0),
            1 => ctx.value::<K1>().map(|k| k.0),
            2 => ctx.value::<K2>().map(|k| k.0),
            _ => ctx.value::<K3>().map(|k| k.0),
        }
    }

    proptest! {
        #[test]
        fn absent_keys_are_not_found(
            attached in proptest::collection::vec((0u8..3, any::<u32>()), 0..8),
        ) {
            // Only K0..K2 are ever attached, so K3 must never resolve.
            let ctx = attached
                .iter()
                .fold(RequestContext::background(), |ctx, (k, v)| attach(&ctx, *k, *v));
            prop_assert_eq!(lookup(&ctx, 3), None);
        }

        #[test]
        fn with_value_only_changes_its_own_key(
            attached in proptest::collection::vec((0u8..4, any::<u32>()), 0..8),
            key in 0u8..4,
            value in any::<u32>(),
        ) {
            let parent = attached
                .iter()
                .fold(RequestContext::background(), |ctx, (k, v)| attach(&ctx, *k, *v));
            let before: Vec<_> = (0..4).map(|k| lookup(&parent, k)).collect();

            let child = attach(&parent, key, value);

            for k in 0..4u8 {
                prop_assert_eq!(lookup(&parent, k), before[k as usize]);
                if k == key {
                    prop_assert_eq!(lookup(&child, k), Some(value));
                } else {
                    prop_assert_eq!(lookup(&child, k), before[k as usize]);
                }
            }
        }

        #[test]
        fn timeout_derivation_never_extends_deadline(
            parent_ms in 0u64..10_000,
            child_ms in 0u64..10_000,
        ) {
            let (parent, _p) = RequestContext::background()
                .with_timeout(Duration::from_millis(parent_ms));
            let (child, _c) = parent.with_timeout(Duration::from_millis(child_ms));
            prop_assert!(child.deadline() <= parent.deadline());
        }

        #[test]
        fn cancellation_is_permanent_for_descendants(depth in 1usize..6) {
            let (root, handle) = RequestContext::background().with_cancel();
            handle.cancel();

            let mut ctx = root;
            let mut handles = Vec::new();
            for _ in 0..depth {
                let (next, h) = ctx.with_cancel();
                handles.push(h);
                ctx = next.with_value(K0(1));
                prop_assert!(ctx.is_cancelled());
            }
            prop_assert!(ctx.is_cancelled());
        }
    }
}
