//! Per-operation cancellation and deadlines.
//!
//! Every store operation takes a [`Context`]. A context is cancelled either
//! explicitly (its token, or a parent's, is cancelled) or implicitly when its
//! deadline passes.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Cancellation token plus optional deadline.
///
/// Cheap to clone; clones observe the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled unless [`Context::cancel`] is
    /// called.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Derive a child that is cancelled with this context and additionally
    /// expires after `timeout` (or at the parent's deadline, if sooner).
    #[must_use]
    pub fn timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self { token: self.token.child_token(), deadline: Some(deadline) }
    }

    /// Derive a child that is cancelled with this context but can also be
    /// cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token(), deadline: self.deadline }
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context was cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Ok(())` while the context is live, otherwise the matching error.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves when the context is cancelled or its deadline passes, with
    /// the matching error.
    pub async fn done(&self) -> StoreError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.token.cancelled() => StoreError::Cancelled,
                () = tokio::time::sleep_until(deadline) => StoreError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                StoreError::Cancelled
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();

        parent.cancel();

        assert_eq!(child.check(), Err(StoreError::Cancelled));
    }

    #[test]
    fn child_cancel_leaves_parent_live() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();

        assert!(parent.check().is_ok());
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn expired_deadline_is_reported() {
        let ctx = Context::with_timeout(Duration::ZERO);
        assert_eq!(ctx.check(), Err(StoreError::DeadlineExceeded));
        assert_eq!(ctx.done().await, StoreError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn child_timeout_never_outlives_parent() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.timeout(Duration::from_secs(60));

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn done_resolves_on_cancel() {
        let ctx = Context::background();
        let waiter = ctx.clone();

        let handle = tokio::spawn(async move { waiter.done().await });
        ctx.cancel();

        assert_eq!(handle.await.unwrap(), StoreError::Cancelled);
    }
}
