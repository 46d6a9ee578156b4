//! authzd - authorization Policy Decision Point
//!
//! Decides whether a subject, identified by entitlement claim values, may
//! perform an action on a resource in the namespace/project/component
//! hierarchy, and manages the roles and bindings those decisions use.
//! All modules are public so integration tests can reach them.

pub mod authz;
pub mod errors;
pub mod server;
pub mod settings;
