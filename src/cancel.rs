//! Cooperative cancellation for in-flight generation calls.
//!
//! A [`CancellationToken`] is an `AtomicBool` flag plus a `Notify`, so sync
//! code can poll [`CancellationToken::is_cancelled`] and async code can
//! `select!` on [`CancellationToken::cancelled`]. Clones share state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolve once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Cancels its token when dropped.
///
/// Held for the lifetime of an HTTP request so a client disconnect (which
/// drops the handler future) also aborts the generation call.
#[derive(Debug)]
pub struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
