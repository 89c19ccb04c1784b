//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::logging::LoggingLayer;
use super::scope::RequestScopeLayer;
use super::timeout::TimeoutLayer;
use crate::auth::Authenticator;
use crate::service::config::ServerConfig;
use crate::service::operation::{Operation, OperationError, OperationResponse};

/// Build the request pipeline by wrapping a domain service with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `RequestScopeLayer` -- authenticate and attach request ids (before any work)
/// 2. `LoggingLayer` -- request span and completion event, so the ids are in scope
/// 3. `TimeoutLayer` -- per-request deadline, released when the call ends
///
/// The returned service implements `tower::Service<Operation>`.
#[must_use]
pub fn build_request_pipeline<S>(
    service: S,
    authenticator: Arc<dyn Authenticator>,
    config: &ServerConfig,
) -> impl tower::Service<Operation, Response = OperationResponse, Error = OperationError> + Clone
where
    S: tower::Service<Operation, Response = OperationResponse, Error = OperationError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    ServiceBuilder::new()
        .layer(RequestScopeLayer::new(authenticator))
        .layer(LoggingLayer)
        .layer(TimeoutLayer::new(config.operation_timeout()))
        .service(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
