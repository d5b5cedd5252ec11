//! HTTP invoker: one POST per invocation, a 2xx answer is the acknowledgment.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    ContinuationRequest, InvocationReceipt, InvokeError, WorkerInvocation, WorkerInvoker,
};

/// Response headers that may carry the platform's request id.
const REQUEST_ID_HEADERS: [&str; 2] = ["x-amzn-requestid", "x-request-id"];

/// Invokes workers and successor watchdogs through HTTP endpoints.
///
/// Each endpoint is expected to start the execution asynchronously and answer
/// immediately (typically `202 Accepted`).
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: Client,
    /// Endpoint starting a worker; `None` drops worker requests.
    worker_url: Option<String>,
    /// Endpoint starting a watchdog; `None` drops continuation requests.
    continuation_url: Option<String>,
}

impl HttpInvoker {
    /// Creates an invoker.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::InitFailed` if the HTTP client cannot be built.
    pub fn new(
        worker_url: Option<String>,
        continuation_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InvokeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InvokeError::InitFailed(e.to_string()))?;

        Ok(Self {
            client,
            worker_url,
            continuation_url,
        })
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<InvocationReceipt, InvokeError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| InvokeError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(InvokeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let request_id = REQUEST_ID_HEADERS.iter().find_map(|name| {
            response
                .headers()
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });

        Ok(InvocationReceipt::accepted(status.as_u16(), request_id))
    }
}

#[async_trait]
impl WorkerInvoker for HttpInvoker {
    async fn trigger_worker(
        &self,
        invocation: &WorkerInvocation,
    ) -> Result<InvocationReceipt, InvokeError> {
        let Some(url) = self.worker_url.as_deref() else {
            warn!(worker_id = %invocation.worker_id, "No worker endpoint configured, dropping request");
            return Ok(InvocationReceipt::skipped());
        };

        let receipt = self.post(url, invocation).await?;
        debug!(
            worker_id = %invocation.worker_id,
            status = ?receipt.status,
            request_id = ?receipt.request_id,
            "Worker invocation accepted"
        );
        Ok(receipt)
    }

    async fn trigger_continuation(
        &self,
        request: &ContinuationRequest,
    ) -> Result<InvocationReceipt, InvokeError> {
        let Some(url) = self.continuation_url.as_deref() else {
            warn!(watchdog = %request.watchdog, "No watchdog endpoint configured, dropping continuation");
            return Ok(InvocationReceipt::skipped());
        };

        let receipt = self.post(url, request).await?;
        debug!(
            watchdog = %request.watchdog,
            status = ?receipt.status,
            request_id = ?receipt.request_id,
            "Continuation invocation accepted"
        );
        Ok(receipt)
    }
}
