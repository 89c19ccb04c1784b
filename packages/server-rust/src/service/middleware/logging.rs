//! Request logging middleware.
//!
//! Wraps each operation in a `request` span carrying the correlation ids and
//! emits one completion event with the outcome and duration.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::classify::classify;
use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with a `tracing` span.
#[derive(Debug, Clone)]
pub struct LoggingLayer;

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService { inner }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

/// Service wrapper that records operation duration and outcome.
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
}

impl<S> Service<Operation> for LoggingService<S>
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

    fn call(&mut self, op: Operation) -> Self::Future {
        let operation = op.name();
        let ctx = op.ctx();
        let span = info_span!(
            "request",
            operation,
            request_id = ctx.request_id().map(|id| id.as_str()),
            user_id = ctx.user_id().map(|id| id.as_str()),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let start = ctx.start_time().unwrap_or_else(Instant::now);

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);

                match &result {
                    Ok(_) => {
                        span.record("outcome", "ok");
                        tracing::info!(operation, duration_ms, outcome = "ok", "request complete");
                    }
                    Err(err) => {
                        let class = classify(err);
                        span.record("outcome", class.as_str());
                        tracing::info!(
                            operation,
                            duration_ms,
                            outcome = class.as_str(),
                            code = %err.code(),
                            error = %err,
                            "request complete"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
