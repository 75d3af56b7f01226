//! Operation Handles
//!
//! `send` and `send_expecting_response` return immediately with a handle.
//! Completion is first-writer-wins: normal completion, failure and explicit
//! cancellation race safely and the loser is a no-op.

use crate::error::ChannelError;
use crate::message::Message;
use crate::request::Request;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Default)]
struct OperationState {
    completed: bool,
    succeeded: bool,
    message: Option<String>,
    cause: Option<Arc<ChannelError>>,
}

struct OperationInner {
    state: Mutex<OperationState>,
    done: watch::Sender<bool>,
}

/// Handle for an asynchronous send
#[derive(Clone)]
pub struct SendOperation {
    inner: Arc<OperationInner>,
}

impl fmt::Debug for SendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SendOperation")
            .field("completed", &state.completed)
            .field("succeeded", &state.succeeded)
            .field("message", &state.message)
            .finish()
    }
}

impl SendOperation {
    pub(crate) fn pending() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(OperationInner {
                state: Mutex::new(OperationState::default()),
                done,
            }),
        }
    }

    /// Handle that has already failed locally
    pub(crate) fn failed(message: impl Into<String>, cause: Option<ChannelError>) -> Self {
        let operation = Self::pending();
        operation.complete_failure(message, cause);
        operation
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    pub fn is_succeeded(&self) -> bool {
        self.inner.state.lock().succeeded
    }

    /// Failure description, if any
    pub fn message(&self) -> Option<String> {
        self.inner.state.lock().message.clone()
    }

    pub fn cause(&self) -> Option<Arc<ChannelError>> {
        self.inner.state.lock().cause.clone()
    }

    pub(crate) fn complete_success(&self) -> bool {
        self.complete(true, None, None)
    }

    pub(crate) fn complete_failure(&self, message: impl Into<String>, cause: Option<ChannelError>) -> bool {
        self.complete(false, Some(message.into()), cause)
    }

    /// Cancel the operation; returns `false` if it had already completed
    pub fn cancel(&self) -> bool {
        self.complete_failure("operation cancelled", None)
    }

    fn complete(&self, succeeded: bool, message: Option<String>, cause: Option<ChannelError>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.completed {
                return false;
            }
            state.completed = true;
            state.succeeded = succeeded;
            state.message = message;
            state.cause = cause.map(Arc::new);
        }
        self.inner.done.send_replace(true);
        true
    }

    /// Wait until the operation completes
    ///
    /// With a timeout, returns `false` if it elapsed first; the operation is
    /// then cancelled when `cancel_on_timeout` is set.
    pub async fn wait_completion(&self, timeout: Option<Duration>, cancel_on_timeout: bool) -> bool {
        let completed = self.wait(timeout).await;
        if !completed && cancel_on_timeout {
            self.cancel();
        }
        completed
    }

    async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut done = self.inner.done.subscribe();
        let finished = async move { done.wait_for(|completed| *completed).await.is_ok() };
        match timeout {
            None => finished.await,
            Some(limit) => tokio::time::timeout(limit, finished).await.unwrap_or(false),
        }
    }
}

/// Handle for a request expecting a correlated response
///
/// The operation completes when the request reaches a terminal state:
/// successfully on a response, with a failure on expiry or cancellation.
/// Local failures (empty key, duplicate key, not connected) complete it
/// immediately and no [`Request`] exists.
pub struct RequestOperation<M: Message> {
    operation: SendOperation,
    request: Option<Arc<Request<M>>>,
}

impl<M: Message> fmt::Debug for RequestOperation<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOperation")
            .field("operation", &self.operation)
            .field("request", &self.request)
            .finish()
    }
}

impl<M: Message> Clone for RequestOperation<M> {
    fn clone(&self) -> Self {
        Self {
            operation: self.operation.clone(),
            request: self.request.clone(),
        }
    }
}

impl<M: Message> RequestOperation<M> {
    pub(crate) fn new(request: Arc<Request<M>>) -> Self {
        Self {
            operation: request.operation().clone(),
            request: Some(request),
        }
    }

    pub(crate) fn failed(message: impl Into<String>, cause: Option<ChannelError>) -> Self {
        Self {
            operation: SendOperation::failed(message, cause),
            request: None,
        }
    }

    pub fn operation(&self) -> &SendOperation {
        &self.operation
    }

    /// The registered request; `None` after a local failure
    pub fn request(&self) -> Option<&Arc<Request<M>>> {
        self.request.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.operation.is_completed()
    }

    pub fn is_succeeded(&self) -> bool {
        self.operation.is_succeeded()
    }

    pub fn message(&self) -> Option<String> {
        self.operation.message()
    }

    pub fn cause(&self) -> Option<Arc<ChannelError>> {
        self.operation.cause()
    }

    /// Response message, once one has arrived
    pub fn response(&self) -> Option<M> {
        self.request.as_ref().and_then(|request| request.response())
    }

    /// Cancel the request (removing it from the pending table) and the operation
    pub fn cancel(&self) -> bool {
        match &self.request {
            Some(request) => request.cancel(true),
            None => self.operation.cancel(),
        }
    }

    /// Wait for a response, expiry or cancellation
    pub async fn wait_completion(&self, timeout: Option<Duration>, cancel_on_timeout: bool) -> bool {
        let completed = self.operation.wait(timeout).await;
        if !completed && cancel_on_timeout {
            self.cancel();
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let operation = SendOperation::pending();
        assert!(!operation.is_completed());

        assert!(operation.complete_success());
        assert!(!operation.cancel());
        assert!(operation.is_succeeded());
        assert!(operation.message().is_none());
        assert!(operation.wait_completion(Some(Duration::from_millis(10)), false).await);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_completion() {
        let operation = SendOperation::pending();
        let waiter = {
            let operation = operation.clone();
            tokio::spawn(async move { operation.wait_completion(None, false).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        operation.complete_failure("write failed", Some(ChannelError::NotConnected));

        assert!(waiter.await.unwrap());
        assert!(!operation.is_succeeded());
        assert_eq!(operation.message().as_deref(), Some("write failed"));
        assert!(matches!(
            operation.cause().as_deref(),
            Some(ChannelError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_timeout_then_cancel() {
        let operation = SendOperation::pending();
        assert!(!operation.wait_completion(Some(Duration::from_millis(20)), true).await);
        assert!(operation.is_completed());
        assert!(!operation.is_succeeded());
        assert_eq!(operation.message().as_deref(), Some("operation cancelled"));
    }

    #[tokio::test]
    async fn test_timeout_without_cancel_leaves_operation_pending() {
        let operation = SendOperation::pending();
        assert!(!operation.wait_completion(Some(Duration::from_millis(20)), false).await);
        assert!(!operation.is_completed());
    }
}
