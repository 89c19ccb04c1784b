//! Repository trait for entities.
//!
//! Every call takes the request context. Implementations check it before and
//! after each unit of work and give up with the context's error once it is
//! cancelled, instead of returning a normal result.

use async_trait::async_trait;
use reqscope_core::{coded, Code, ContextError, RequestContext};

use crate::service::domain::Entity;
use crate::service::operation::OperationError;

/// Errors returned by an [`EntityStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("entity {id:?} already exists")]
    DuplicateId { id: String },
    #[error("email {email:?} already exists")]
    DuplicateEmail { email: String },
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Context(err) => OperationError::Context(err),
            StoreError::DuplicateId { id } => {
                coded!(Code::ALREADY_EXISTS, "entity {id:?} already exists").into()
            }
            StoreError::DuplicateEmail { email } => {
                coded!(Code::ALREADY_EXISTS, "email {email:?} already exists").into()
            }
        }
    }
}

/// Entity repository.
///
/// Wrapped in `Arc<dyn EntityStore>` for sharing across async boundaries.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Stores a new entity. Ids and emails are unique.
    async fn insert(&self, ctx: &RequestContext, entity: Entity) -> Result<Entity, StoreError>;

    /// Returns all entities in insertion order.
    async fn list(&self, ctx: &RequestContext) -> Result<Vec<Entity>, StoreError>;

    /// Return the number of entities.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_errors_become_already_exists() {
        let err = OperationError::from(StoreError::DuplicateEmail {
            email: "a@b.c".to_string(),
        });
        assert_eq!(err.code(), Code::ALREADY_EXISTS);
        assert_eq!(err.to_string(), "email \"a@b.c\" already exists");
    }

    #[test]
    fn context_errors_pass_through() {
        let err = OperationError::from(StoreError::Context(ContextError::Cancelled));
        assert!(matches!(err, OperationError::Context(ContextError::Cancelled)));
    }
}
