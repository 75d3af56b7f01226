//! Request / Response Correlation State
//!
//! A [`Request`] is the placeholder for a sent message awaiting its
//! correlated response:
//!
//! ```text
//! Created ──► Transmitted ──┬──► Responded
//!    │                      ├──► Expired
//!    └──────────────────────┴──► Cancelled
//! ```
//!
//! The three terminal states are mutually exclusive. The first transition
//! wins under the per-request lock and later attempts are no-ops. Reaching
//! a terminal state aborts the expiry timer, releases the request from its
//! owner's pending table, completes the request's operation handle and wakes
//! every waiter.

use crate::error::ChannelError;
use crate::message::Message;
use crate::operation::SendOperation;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Created,
    /// Written to the transport; the expiry timer is running
    Transmitted,
    Responded,
    Expired,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded | Self::Expired | Self::Cancelled)
    }
}

/// Owner of a pending-request table
pub(crate) trait RequestOwner<M: Message>: Send + Sync {
    /// Drop `request` from the pending table (if still registered under its
    /// key) and publish it when `publish` is set
    fn release_request(&self, request: &Arc<Request<M>>, publish: bool);
}

struct RequestState<M> {
    status: RequestStatus,
    response: Option<M>,
    transmitted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    timer: Option<AbortHandle>,
}

/// A sent message awaiting a correlated response
pub struct Request<M: Message> {
    key: String,
    message: M,
    timeout: Duration,
    send_to_tuple_space: bool,
    created_at: DateTime<Utc>,
    state: Mutex<RequestState<M>>,
    status: watch::Sender<RequestStatus>,
    operation: SendOperation,
    owner: Weak<dyn RequestOwner<M>>,
    span: Span,
}

impl<M: Message> fmt::Debug for Request<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Request")
            .field("key", &self.key)
            .field("status", &state.status)
            .field("timeout", &self.timeout)
            .field("send_to_tuple_space", &self.send_to_tuple_space)
            .field("message", &self.message)
            .field("response", &state.response)
            .finish()
    }
}

impl<M: Message> Request<M> {
    pub(crate) fn new(
        key: String,
        message: M,
        timeout: Duration,
        send_to_tuple_space: bool,
        owner: Weak<dyn RequestOwner<M>>,
        span: Span,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(RequestStatus::Created);
        Arc::new(Self {
            key,
            message,
            timeout,
            send_to_tuple_space,
            created_at: Utc::now(),
            state: Mutex::new(RequestState {
                status: RequestStatus::Created,
                response: None,
                transmitted_at: None,
                completed_at: None,
                timer: None,
            }),
            status,
            operation: SendOperation::pending(),
            owner,
            span,
        })
    }

    /// Correlation key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The request message as sent
    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the completed request is published to the tuple space
    pub fn send_to_tuple_space(&self) -> bool {
        self.send_to_tuple_space
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn transmitted_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().transmitted_at
    }

    /// When the request reached its terminal state
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().completed_at
    }

    pub fn status(&self) -> RequestStatus {
        self.state.lock().status
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_responded(&self) -> bool {
        self.status() == RequestStatus::Responded
    }

    pub fn is_expired(&self) -> bool {
        self.status() == RequestStatus::Expired
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == RequestStatus::Cancelled
    }

    pub fn response(&self) -> Option<M> {
        self.state.lock().response.clone()
    }

    pub(crate) fn operation(&self) -> &SendOperation {
        &self.operation
    }

    pub(crate) fn mark_transmitted(&self) {
        let mut state = self.state.lock();
        if state.status == RequestStatus::Created {
            state.status = RequestStatus::Transmitted;
            state.transmitted_at = Some(Utc::now());
            drop(state);
            self.status.send_replace(RequestStatus::Transmitted);
        }
    }

    /// Arm the expiry timer; no-op once terminal or already armed
    pub(crate) fn start_timer(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.status.is_terminal() || state.timer.is_some() {
            return;
        }
        let request = Arc::downgrade(self);
        let timeout = self.timeout;
        let timer = tokio::spawn(
            async move {
                tokio::time::sleep(timeout).await;
                if let Some(request) = request.upgrade() {
                    request.expire();
                }
            }
            .instrument(self.span.clone()),
        );
        state.timer = Some(timer.abort_handle());
    }

    /// Complete with `response`; hands the message back if already terminal
    pub(crate) fn set_response(self: &Arc<Self>, response: M) -> Result<(), M> {
        let timer = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return Err(response);
            }
            state.response = Some(response);
            Self::enter_terminal(&mut state, RequestStatus::Responded)
        };
        self.after_terminal(RequestStatus::Responded, timer, true);
        Ok(())
    }

    /// Cancel; with `notify_owner` the owner drops and possibly publishes it
    ///
    /// Returns `false` if the request was already terminal.
    pub fn cancel(self: &Arc<Self>, notify_owner: bool) -> bool {
        self.finish(RequestStatus::Cancelled, notify_owner)
    }

    pub(crate) fn expire(self: &Arc<Self>) -> bool {
        self.finish(RequestStatus::Expired, true)
    }

    fn finish(self: &Arc<Self>, status: RequestStatus, notify_owner: bool) -> bool {
        let timer = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            Self::enter_terminal(&mut state, status)
        };
        self.after_terminal(status, timer, notify_owner);
        true
    }

    fn enter_terminal(state: &mut RequestState<M>, status: RequestStatus) -> Option<AbortHandle> {
        state.status = status;
        state.completed_at = Some(Utc::now());
        state.timer.take()
    }

    fn after_terminal(self: &Arc<Self>, status: RequestStatus, timer: Option<AbortHandle>, notify_owner: bool) {
        if let Some(timer) = timer {
            timer.abort();
        }

        if notify_owner {
            if let Some(owner) = self.owner.upgrade() {
                owner.release_request(self, self.send_to_tuple_space);
            }
        }

        match status {
            RequestStatus::Responded => {
                self.operation.complete_success();
            }
            RequestStatus::Expired => {
                self.operation.complete_failure(
                    format!("no response within {}ms", self.timeout.as_millis()),
                    Some(ChannelError::timeout(
                        format!("request '{}'", self.key),
                        self.timeout.as_millis() as u64,
                    )),
                );
            }
            _ => {
                self.operation.complete_failure("request cancelled", None);
            }
        }

        self.status.send_replace(status);
        self.span.in_scope(|| debug!(key = %self.key, ?status, "Request completed"));
    }

    /// Wait until the request reaches a terminal state
    pub async fn wait(&self) -> RequestStatus {
        let mut status = self.status.subscribe();
        let reached = status.wait_for(|s| s.is_terminal()).await.is_ok();
        if reached {
            self.status()
        } else {
            RequestStatus::Cancelled
        }
    }

    /// Wait for the response; `None` after expiry or cancellation
    pub async fn wait_response(&self) -> Option<M> {
        match self.wait().await {
            RequestStatus::Responded => self.response(),
            _ => None,
        }
    }
}
