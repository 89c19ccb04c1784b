//! Request handling: typed operations, the middleware pipeline that runs them
//! under a request context, and the domain services at the bottom of it.
//!
//! 1. **Operations** (`operation`): `Operation`, `OperationResponse`, `OperationError`
//! 2. **Middleware** (`middleware`): Tower layers (request scope, logging, timeout)
//! 3. **Domain services** (`domain`): the entity use case
//! 4. **Classification** (`classify`): `OperationError` -> response class and status

pub mod classify;
pub mod config;
pub mod domain;
pub mod middleware;
pub mod operation;

// Re-export key types for convenient access.
pub use classify::{classify, classify_code, Classification};
pub use config::ServerConfig;
pub use domain::{Entity, EntityService, EntityUsecase};
pub use middleware::build_request_pipeline;
pub use operation::{operation_names, Operation, OperationError, OperationResponse};
