//! Request-scope middleware.
//!
//! Authenticates the caller and attaches per-request values (principal, user
//! id, request id, start time) to the operation's context before anything
//! else runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use reqscope_core::{RequestId, UserId};
use tokio::time::Instant;
use tower::{Layer, Service};

use crate::auth::{Authenticator, Credentials};
use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// RequestScopeLayer
// ---------------------------------------------------------------------------

/// Tower layer that resolves the caller and seeds the request context.
#[derive(Clone)]
pub struct RequestScopeLayer {
    authenticator: Arc<dyn Authenticator>,
}

impl RequestScopeLayer {
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for RequestScopeLayer {
    type Service = RequestScopeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestScopeService {
            inner,
            authenticator: Arc::clone(&self.authenticator),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestScopeService
// ---------------------------------------------------------------------------

/// Service wrapper that rejects unauthenticated callers and attaches the
/// request's identity values.
#[derive(Clone)]
pub struct RequestScopeService<S> {
    inner: S,
    authenticator: Arc<dyn Authenticator>,
}

impl<S> Service<Operation> for RequestScopeService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut op: Operation) -> Self::Future {
        let principal = match self
            .authenticator
            .authenticate(op.ctx().value::<Credentials>())
        {
            Ok(principal) => principal,
            Err(err) => {
                tracing::warn!(operation = op.name(), error = %err, "rejecting request");
                return Box::pin(async move {
                    Err(OperationError::Unauthenticated {
                        reason: err.to_string(),
                    })
                });
            }
        };

        let request_id = op
            .ctx()
            .request_id()
            .cloned()
            .unwrap_or_else(RequestId::generate);
        let scoped = op
            .ctx()
            .with_value(UserId::clone(&principal.id))
            .with_value(principal)
            .with_value(request_id)
            .with_start_time(Instant::now());
        *op.ctx_mut() = scoped;

        Box::pin(self.inner.call(op))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
