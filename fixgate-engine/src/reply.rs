/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Asynchronous reply handles.
//!
//! Every administrative request returns a [`Reply`] immediately. The framer
//! is the only component that completes replies; it also sweeps pending
//! deadlines each duty cycle, so expiry is observed there and a late
//! completion for a timed-out reply is dropped. A reply transitions exactly
//! once.

use fixgate_core::GatewayError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// Lifecycle of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Result not yet known.
    Pending,
    /// Operation succeeded; the result is available.
    Completed,
    /// Operation failed; the error is available.
    Errored,
    /// The deadline passed before a completion arrived.
    TimedOut,
}

#[derive(Debug)]
struct Inner<T> {
    state: ReplyState,
    result: Option<T>,
    error: Option<GatewayError>,
}

/// Future-like handle for one administrative operation.
#[derive(Debug)]
pub struct Reply<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    deadline: Instant,
}

impl<T> Reply<T> {
    /// Creates a pending reply expiring at `deadline`.
    #[must_use]
    pub fn new(deadline: Instant) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: ReplyState::Pending,
                result: None,
                error: None,
            }),
            notify: Notify::new(),
            deadline,
        })
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ReplyState {
        self.inner.lock().state
    }

    /// Returns the deadline after which the framer expires this reply.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Returns true while no transition has happened.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == ReplyState::Pending
    }

    /// Takes the error message, if the reply errored.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().error.as_ref().map(|e| e.to_string())
    }

    /// Completes the reply. Returns false (dropping `value`) if the reply
    /// already transitioned, e.g. a late completion after a timeout.
    pub fn complete(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ReplyState::Pending {
            return false;
        }
        inner.state = ReplyState::Completed;
        inner.result = Some(value);
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Fails the reply. Returns false if it already transitioned.
    pub fn error(&self, error: GatewayError) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ReplyState::Pending {
            return false;
        }
        inner.state = ReplyState::Errored;
        inner.error = Some(error);
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Expires the reply if still pending past its deadline. Called by the
    /// framer each duty cycle.
    pub fn expire_if_due(&self, now: Instant) -> bool {
        if now < self.deadline {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.state != ReplyState::Pending {
            return false;
        }
        inner.state = ReplyState::TimedOut;
        drop(inner);
        self.notify.notify_waiters();
        true
    }

    /// Waits until the reply leaves the pending state.
    pub async fn await_done(&self) -> ReplyState {
        loop {
            let notified = self.notify.notified();
            let state = self.state();
            if state != ReplyState::Pending {
                return state;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Reply<T> {
    /// Returns a copy of the result, when completed.
    #[must_use]
    pub fn result_if_present(&self) -> Option<T> {
        self.inner.lock().result.clone()
    }
}

/// Type-erased view used by the framer's deadline sweep.
pub trait PendingReply: Send + Sync {
    /// Expires the reply if due; returns true when a transition happened.
    fn sweep(&self, now: Instant) -> bool;
    /// Returns true while the reply is pending.
    fn still_pending(&self) -> bool;
    /// Returns the expiry deadline.
    fn sweep_deadline(&self) -> Instant;
}

impl<T: Send + Sync> PendingReply for Reply<T> {
    fn sweep(&self, now: Instant) -> bool {
        self.expire_if_due(now)
    }

    fn still_pending(&self) -> bool {
        self.is_pending()
    }

    fn sweep_deadline(&self) -> Instant {
        self.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixgate_core::SessionError;
    use std::time::Duration;

    fn reply() -> Arc<Reply<u32>> {
        Reply::new(Instant::now() + Duration::from_secs(5))
    }

    #[test]
    fn test_complete_once() {
        let reply = reply();
        assert!(reply.is_pending());

        assert!(reply.complete(7));
        assert_eq!(reply.state(), ReplyState::Completed);
        assert_eq!(reply.result_if_present(), Some(7));

        // second transition is dropped
        assert!(!reply.complete(8));
        assert!(!reply.error(SessionError::UnableToConnect.into()));
        assert_eq!(reply.result_if_present(), Some(7));
    }

    #[test]
    fn test_error_once() {
        let reply = reply();
        assert!(reply.error(SessionError::UnableToConnect.into()));
        assert_eq!(reply.state(), ReplyState::Errored);
        assert_eq!(reply.error_message().unwrap(), "session error: UNABLE_TO_CONNECT");
        assert!(!reply.complete(1));
    }

    #[test]
    fn test_expiry_and_late_completion() {
        let deadline = Instant::now();
        let reply: Arc<Reply<u32>> = Reply::new(deadline);

        assert!(!reply.expire_if_due(deadline - Duration::from_millis(1)));
        assert!(reply.expire_if_due(deadline + Duration::from_millis(1)));
        assert_eq!(reply.state(), ReplyState::TimedOut);

        // late completion for a timed-out reply is dropped
        assert!(!reply.complete(9));
        assert_eq!(reply.result_if_present(), None);
    }

    #[tokio::test]
    async fn test_await_done() {
        let reply = reply();
        let waiter = {
            let reply = Arc::clone(&reply);
            tokio::spawn(async move { reply.await_done().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        reply.complete(3);

        assert_eq!(waiter.await.unwrap(), ReplyState::Completed);
    }
}
