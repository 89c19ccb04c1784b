use reqscope_core::{Code, CodedError, ContextError, RequestContext};
use serde::Serialize;

use super::domain::Entity;

/// Names of the operations accepted by the pipeline.
pub mod operation_names {
    pub const CREATE_ENTITY: &str = "create_entity";
    pub const LIST_ENTITIES: &str = "list_entities";
}

/// Typed operations dispatched through the pipeline. Each carries the
/// request context it runs under.
#[derive(Debug)]
pub enum Operation {
    CreateEntity { ctx: RequestContext, params: Entity },
    ListEntities { ctx: RequestContext },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &RequestContext {
        match self {
            Self::CreateEntity { ctx, .. } | Self::ListEntities { ctx } => ctx,
        }
    }

    /// Mutable access so middleware can replace the context with a derived one.
    pub fn ctx_mut(&mut self) -> &mut RequestContext {
        match self {
            Self::CreateEntity { ctx, .. } | Self::ListEntities { ctx } => ctx,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateEntity { .. } => operation_names::CREATE_ENTITY,
            Self::ListEntities { .. } => operation_names::LIST_ENTITIES,
        }
    }
}

/// Successful response from an operation handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OperationResponse {
    Entity(Entity),
    Entities(Vec<Entity>),
}

/// Errors returned by operation handlers.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// The request context was cancelled or its deadline elapsed.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// A domain failure with a caller-facing code.
    #[error(transparent)]
    Coded(#[from] CodedError),
    #[error("unauthenticated: {reason}")]
    Unauthenticated { reason: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::Context(err) => err.code(),
            Self::Coded(err) => err.code(),
            Self::Unauthenticated { .. } => Code::UNAUTHORIZED,
            Self::Internal(err) => err
                .chain()
                .map(reqscope_core::get_code)
                .find(|code| *code != Code::UNKNOWN)
                .unwrap_or(Code::INTERNAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctx_mut_replaces_context() {
        let mut op = Operation::ListEntities {
            ctx: RequestContext::background(),
        };
        let derived = op.ctx().with_value(reqscope_core::RequestId::from("r-1"));
        *op.ctx_mut() = derived;
        assert_eq!(op.ctx().request_id().map(|id| id.as_str()), Some("r-1"));
        assert_eq!(op.name(), operation_names::LIST_ENTITIES);
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            OperationError::from(ContextError::DeadlineExceeded).code(),
            Code::DEADLINE_EXCEEDED
        );
        assert_eq!(
            OperationError::from(CodedError::new(Code::INVALID_VALUE, "bad")).code(),
            Code::INVALID_VALUE
        );
        assert_eq!(
            OperationError::Unauthenticated {
                reason: "missing credentials".into()
            }
            .code(),
            Code::UNAUTHORIZED
        );
        assert_eq!(
            OperationError::from(anyhow::anyhow!("boom")).code(),
            Code::INTERNAL
        );
        let wrapped = anyhow::Error::new(CodedError::new(Code::SMTP_SEND, "relay refused"))
            .context("sending welcome mail");
        assert_eq!(OperationError::from(wrapped).code(), Code::SMTP_SEND);
    }
}
