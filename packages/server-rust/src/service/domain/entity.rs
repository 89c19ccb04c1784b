//! Entity use case: create and list entities on behalf of the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use reqscope_core::{coded, Code, CodedError, ContextLog, RequestContext};
use serde::{Deserialize, Serialize};
use tower::Service;

use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::storage::EntityStore;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A stored entity. Empty fields are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub age: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl Entity {
    /// Checks the caller-supplied fields.
    ///
    /// # Errors
    ///
    /// Returns an `INVALID_VALUE` error naming every invalid field, in the
    /// form `invalid value for fields [email, age]`.
    pub fn validate(&self) -> Result<(), CodedError> {
        let mut invalid = Vec::new();
        if self.email.trim().is_empty() {
            invalid.push("email");
        }
        if self.age <= 0 {
            invalid.push("age");
        }
        if self.name.trim().is_empty() {
            invalid.push("name");
        }

        if invalid.is_empty() {
            return Ok(());
        }
        Err(coded!(
            Code::INVALID_VALUE,
            "invalid value for fields [{}]",
            invalid.join(", ")
        ))
    }
}

// ---------------------------------------------------------------------------
// EntityUsecase
// ---------------------------------------------------------------------------

/// Business operations on entities. Every call runs under a request context.
#[async_trait]
pub trait EntityUsecase: Send + Sync {
    /// Validates and stores a new entity owned by the calling user.
    async fn create(&self, ctx: &RequestContext, params: Entity) -> Result<Entity, OperationError>;

    /// Returns every stored entity.
    async fn get_list(&self, ctx: &RequestContext) -> Result<Vec<Entity>, OperationError>;
}

// ---------------------------------------------------------------------------
// EntityService
// ---------------------------------------------------------------------------

/// [`EntityUsecase`] over an [`EntityStore`].
#[derive(Clone)]
pub struct EntityService {
    store: Arc<dyn EntityStore>,
    log: Arc<dyn ContextLog>,
}

impl EntityService {
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, log: Arc<dyn ContextLog>) -> Self {
        Self { store, log }
    }
}

#[async_trait]
impl EntityUsecase for EntityService {
    async fn create(
        &self,
        ctx: &RequestContext,
        mut params: Entity,
    ) -> Result<Entity, OperationError> {
        self.log.info(ctx, &"create data");
        ctx.check()?;

        if let Err(err) = params.validate() {
            self.log.warn(ctx, &err);
            return Err(err.into());
        }

        let Some(user_id) = ctx.user_id() else {
            return Err(coded!(Code::UNAUTHORIZED, "no authenticated user on request").into());
        };
        if params.id.is_empty() {
            params.id = uuid::Uuid::new_v4().to_string();
        }
        params.created_by = user_id.as_str().to_string();

        let created = match self.store.insert(ctx, params).await {
            Ok(created) => created,
            Err(err) => {
                self.log.error(ctx, &err);
                return Err(err.into());
            }
        };

        self.log.info(ctx, &"returning response");
        Ok(created)
    }

    async fn get_list(&self, ctx: &RequestContext) -> Result<Vec<Entity>, OperationError> {
        self.log.debug(ctx, &"list data");
        ctx.check()?;

        match self.store.list(ctx).await {
            Ok(entities) => Ok(entities),
            Err(err) => {
                self.log.error(ctx, &err);
                Err(err.into())
            }
        }
    }
}

impl Service<Operation> for EntityService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let svc = self.clone();
        Box::pin(async move {
            match op {
                Operation::CreateEntity { ctx, params } => {
                    svc.create(&ctx, params).await.map(OperationResponse::Entity)
                }
                Operation::ListEntities { ctx } => {
                    svc.get_list(&ctx).await.map(OperationResponse::Entities)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
