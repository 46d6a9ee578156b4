//! Policy Decision Point: hierarchical, entitlement-matched RBAC with
//! allow/deny bindings and deny-wins precedence.

pub mod actions;
pub mod batch;
pub mod engine;
pub mod errors;
pub mod hierarchy;
pub mod index;
pub mod loader;
pub mod policy;
pub mod profile;
pub mod repository;
pub mod service;
pub mod store;
pub mod types;
pub mod web;

pub use errors::AuthzError;
pub use repository::{KdlDirectoryRepository, PolicyRepository, PolicySync};
pub use service::Authorizer;
pub use store::{PolicySnapshot, PolicyStore};
