pub mod admin;
pub mod authorize;
pub mod cache;
pub mod config;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod permissions;
pub mod privacy;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod types;

pub use admin::AccessAdmin;
pub use authorize::{AccessContext, Authorizer};
pub use config::{AccessConfig, PrivilegePolicy};
pub use error::AuthError;
pub use jwt::{AccessClaims, verify_jwt};
pub use middleware::{AccessGuard, AccessLayer};
pub use permissions::{Action, ActionScope, GrantSet, PermissionKey, Requirement};
pub use privacy::{
    DataPrivacyFilter, OwnerPredicate, Owned, ResourceQuery, ScopedQuery, Stampable,
};
pub use registry::{ModuleDef, ModuleRegistry, NavEntry, RouteBinding};
pub use resolver::{Decision, PermissionResolver};
pub use store::{AccessStore, SqliteAccessStore};
pub use types::*;

#[cfg(feature = "postgres")]
pub use store::PostgresAccessStore;
