//! Cooperative cancellation for the control loops.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stop signal shared between a running loop and whoever controls it.
///
/// Loops check the token at the top of every cycle, and every sleep inside a
/// loop goes through [`CancelToken::sleep`], which wakes up as soon as the
/// token is cancelled. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every sleeper.
    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.wake.notify_all();
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Returns `Err(Cancelled)` if the token was cancelled.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `Err(Cancelled)` if the token is or becomes cancelled.
    /// A duration too large to form a deadline sleeps until cancelled.
    pub fn sleep(&self, duration: Duration) -> SyncResult<()> {
        let mut cancelled = self.inner.cancelled.lock();
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while !*cancelled {
                self.inner.wake.wait(&mut cancelled);
            }
            return Err(SyncError::Cancelled);
        };
        while !*cancelled {
            if self
                .inner
                .wake
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                return if *cancelled {
                    Err(SyncError::Cancelled)
                } else {
                    Ok(())
                };
            }
        }
        Err(SyncError::Cancelled)
    }
}
