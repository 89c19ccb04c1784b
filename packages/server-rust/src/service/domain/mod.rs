//! Domain services.
//!
//! Each service implements `tower::Service<Operation>` so it can sit at the
//! bottom of the request pipeline.

pub mod entity;

pub use entity::{Entity, EntityService, EntityUsecase};
