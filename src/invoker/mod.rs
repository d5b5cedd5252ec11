//! Starting workers and successor watchdogs.
//!
//! Both operations are asynchronous requests to a remote platform: the caller
//! learns that the request was accepted, never how the started execution
//! ends. A worker, once running, registers itself through
//! [`WorkerRegistry`](crate::intercom::WorkerRegistry); the watchdog only
//! reads the counters.
//!
//! Retrying a rejected request is the platform's concern, not ours.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub use http::HttpInvoker;

/// Errors that can occur while requesting an invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The request never got an answer.
    #[error("Invocation request failed: {0}")]
    RequestFailed(String),

    /// The platform answered but refused the invocation.
    #[error("Invocation rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The client could not be built.
    #[error("Invoker initialization failed: {0}")]
    InitFailed(String),
}

/// Payload handed to every worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerInvocation {
    /// Identifier the worker registers itself under.
    pub worker_id: Uuid,
    /// Watchdog scope whose counters the worker updates.
    pub watchdog: String,
    /// Prefix of the worker's registration key.
    pub prefix: String,
    /// When the watchdog asked for this worker.
    pub triggered_at: DateTime<Utc>,
}

impl WorkerInvocation {
    /// Creates a payload with a fresh worker id.
    pub fn new(watchdog: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            watchdog: watchdog.into(),
            prefix: prefix.into(),
            triggered_at: Utc::now(),
        }
    }
}

/// Payload handed to a successor watchdog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContinuationRequest {
    /// Scope the successor should monitor.
    pub watchdog: String,
    /// When the predecessor asked for it.
    pub requested_at: DateTime<Utc>,
    /// Why the predecessor stopped.
    pub reason: String,
}

impl ContinuationRequest {
    pub fn new(watchdog: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            watchdog: watchdog.into(),
            requested_at: Utc::now(),
            reason: reason.into(),
        }
    }
}

/// Acknowledgment that the platform accepted an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReceipt {
    /// Status reported by the platform (`None` when nothing was sent).
    pub status: Option<u16>,
    /// Platform-assigned request id, if any.
    pub request_id: Option<String>,
}

impl InvocationReceipt {
    /// Receipt for a request that was dropped on purpose.
    pub fn skipped() -> Self {
        Self {
            status: None,
            request_id: None,
        }
    }

    pub fn accepted(status: u16, request_id: Option<String>) -> Self {
        Self {
            status: Some(status),
            request_id,
        }
    }

    /// Whether the request actually reached a platform.
    pub fn was_sent(&self) -> bool {
        self.status.is_some()
    }
}

/// Triggers worker executions and successor watchdogs.
#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    /// Requests one worker execution. Returns once the request is accepted;
    /// does not wait for the worker.
    async fn trigger_worker(
        &self,
        invocation: &WorkerInvocation,
    ) -> Result<InvocationReceipt, InvokeError>;

    /// Requests a successor watchdog and waits for the acceptance
    /// acknowledgment, never for the successor's completion.
    async fn trigger_continuation(
        &self,
        request: &ContinuationRequest,
    ) -> Result<InvocationReceipt, InvokeError>;
}

/// Invoker used when the invocation locators are `disabled`.
#[derive(Debug, Clone, Default)]
pub struct DisabledInvoker;

#[async_trait]
impl WorkerInvoker for DisabledInvoker {
    async fn trigger_worker(
        &self,
        invocation: &WorkerInvocation,
    ) -> Result<InvocationReceipt, InvokeError> {
        warn!(worker_id = %invocation.worker_id, "Worker invocation is disabled, dropping request");
        Ok(InvocationReceipt::skipped())
    }

    async fn trigger_continuation(
        &self,
        request: &ContinuationRequest,
    ) -> Result<InvocationReceipt, InvokeError> {
        warn!(watchdog = %request.watchdog, "Continuation invocation is disabled, dropping request");
        Ok(InvocationReceipt::skipped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_invocation_payload_shape() {
        let invocation = WorkerInvocation::new("fleet", "fleet:worker:");
        let json = serde_json::to_value(&invocation).expect("should serialize");

        assert_eq!(json["watchdog"], "fleet");
        assert_eq!(json["prefix"], "fleet:worker:");
        assert!(json["worker_id"].is_string());
        assert!(json["triggered_at"].is_string());
    }

    #[test]
    fn test_worker_ids_are_unique() {
        let a = WorkerInvocation::new("fleet", "p:");
        let b = WorkerInvocation::new("fleet", "p:");
        assert_ne!(a.worker_id, b.worker_id);
    }

    #[tokio::test]
    async fn test_disabled_invoker_accepts_without_sending() {
        let invoker = DisabledInvoker;
        let receipt = invoker
            .trigger_worker(&WorkerInvocation::new("fleet", "p:"))
            .await
            .unwrap();
        assert!(!receipt.was_sent());

        let receipt = invoker
            .trigger_continuation(&ContinuationRequest::new("fleet", "deadline"))
            .await
            .unwrap();
        assert_eq!(receipt, InvocationReceipt::skipped());
    }

    #[test]
    fn test_invoke_error_display() {
        let err = InvokeError::Rejected {
            status: 429,
            body: "throttled".to_string(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("throttled"));
    }
}
