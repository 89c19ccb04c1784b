//! `reqscope` server: a tower request pipeline that runs every operation
//! under a request context with identity, deadline, and cancellation.

pub mod auth;
pub mod service;
pub mod storage;

pub use auth::{Authenticator, Credentials, StaticAuthenticator};
