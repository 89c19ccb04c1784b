//! Tower middleware layers for the request pipeline.
//!
//! - [`scope`]: Caller authentication and request-scoped values
//! - [`logging`]: Request span and completion event via `tracing`
//! - [`timeout`]: Per-request deadline enforcement
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod logging;
pub mod pipeline;
pub mod scope;
pub mod timeout;

pub use logging::LoggingLayer;
pub use pipeline::build_request_pipeline;
pub use scope::RequestScopeLayer;
pub use timeout::TimeoutLayer;
