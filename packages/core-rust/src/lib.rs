//! `reqscope` core: request-scoped context, coded errors, and context-aware logging.

pub mod context;
pub mod error;
pub mod log;
pub mod types;

pub use context::{CancelHandle, ContextError, RequestContext};
pub use error::{get_code, BoxError, Code, CodeRange, CodedError};
pub use log::{ContextLog, Level, LogConfig, LogConfigError, LogFields, TracingLog};
pub use types::{Principal, RequestId, UserId};
