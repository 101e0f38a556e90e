//! Row-level data privacy for owned resources.
//!
//! Every entry point takes an [`AccessContext`], which only the authorizer
//! can produce, so rows are never filtered for a request that has not
//! passed the module-level check.

use crate::authorize::AccessContext;
use crate::config::{AccessConfig, PrivilegePolicy};
use crate::error::AuthError;

/// An existing row of an owned resource table.
pub trait Owned {
    /// Resource kind, e.g. `cards`.
    fn resource_kind(&self) -> &str;
    fn resource_id(&self) -> &str;
    /// `None` for unassigned legacy rows.
    fn owner_id(&self) -> Option<&str>;
}

/// A row about to be created.
pub trait Stampable {
    /// Owner explicitly requested by the creation payload, if any.
    fn requested_owner(&self) -> Option<&str>;
    fn set_owner(&mut self, owner_id: String);
}

/// Ownership restriction applied to reads of an owned resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerPredicate {
    Unrestricted,
    OwnedBy {
        user_id: String,
        include_unassigned: bool,
    },
}

impl OwnerPredicate {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, OwnerPredicate::Unrestricted)
    }

    /// Owner id to bind into the rendered condition.
    pub fn owner(&self) -> Option<&str> {
        match self {
            OwnerPredicate::Unrestricted => None,
            OwnerPredicate::OwnedBy { user_id, .. } => Some(user_id),
        }
    }

    pub fn admits(&self, owner: Option<&str>) -> bool {
        match self {
            OwnerPredicate::Unrestricted => true,
            OwnerPredicate::OwnedBy {
                user_id,
                include_unassigned,
            } => match owner {
                Some(o) => o == user_id,
                None => *include_unassigned,
            },
        }
    }

    /// Render as a SQL condition on `column`, with the owner id bound at
    /// `placeholder` (`?1`, `$2`, ...). `None` when no condition applies.
    /// `column` must be a trusted identifier.
    pub fn sql_condition(&self, column: &str, placeholder: &str) -> Option<String> {
        match self {
            OwnerPredicate::Unrestricted => None,
            OwnerPredicate::OwnedBy {
                include_unassigned: false,
                ..
            } => Some(format!("{column} = {placeholder}")),
            OwnerPredicate::OwnedBy {
                include_unassigned: true,
                ..
            } => Some(format!("({column} = {placeholder} OR {column} IS NULL)")),
        }
    }
}

/// An unscoped read against one resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub kind: String,
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl ResourceQuery {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

/// A read that has been through [`DataPrivacyFilter::scope_query`].
/// Resource stores accept only this type.
#[derive(Debug, Clone)]
pub struct ScopedQuery {
    query: ResourceQuery,
    owner: OwnerPredicate,
}

impl ScopedQuery {
    pub fn query(&self) -> &ResourceQuery {
        &self.query
    }

    pub fn owner(&self) -> &OwnerPredicate {
        &self.owner
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DataPrivacyFilter {
    policy: PrivilegePolicy,
    unassigned_privileged_only: bool,
}

impl DataPrivacyFilter {
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            policy: config.privilege_policy(),
            unassigned_privileged_only: config.treat_unassigned_as_privileged_only,
        }
    }

    pub fn is_privileged(&self, ctx: &AccessContext) -> bool {
        self.policy.is_privileged(ctx.principal())
    }

    pub fn predicate(&self, ctx: &AccessContext) -> OwnerPredicate {
        if self.is_privileged(ctx) {
            OwnerPredicate::Unrestricted
        } else {
            OwnerPredicate::OwnedBy {
                user_id: ctx.user_id().to_string(),
                include_unassigned: !self.unassigned_privileged_only,
            }
        }
    }

    pub fn scope_query(&self, ctx: &AccessContext, query: ResourceQuery) -> ScopedQuery {
        ScopedQuery {
            owner: self.predicate(ctx),
            query,
        }
    }

    /// Single-row read check. A miss is reported as an ownership violation,
    /// which renders as not-found.
    pub fn assert_visible<T: Owned>(&self, ctx: &AccessContext, row: &T) -> Result<(), AuthError> {
        if self.predicate(ctx).admits(row.owner_id()) {
            Ok(())
        } else {
            Err(self.violation(ctx, row))
        }
    }

    /// Write check for update and delete. Unassigned rows are writable only
    /// by privileged principals, whatever the visibility flag says.
    pub fn assert_ownership<T: Owned>(
        &self,
        ctx: &AccessContext,
        row: &T,
    ) -> Result<(), AuthError> {
        if self.is_privileged(ctx) || row.owner_id() == Some(ctx.user_id()) {
            Ok(())
        } else {
            Err(self.violation(ctx, row))
        }
    }

    /// Set the owner of a new row. Only privileged principals may hand the
    /// row to someone else.
    pub fn stamp_ownership<T: Stampable>(&self, ctx: &AccessContext, mut row: T) -> T {
        let owner = match row.requested_owner() {
            Some(requested) if self.is_privileged(ctx) => requested.to_string(),
            Some(requested) if requested != ctx.user_id() => {
                tracing::debug!(
                    user_id = %ctx.user_id(),
                    requested = %requested,
                    "requested owner ignored for non-privileged caller"
                );
                ctx.user_id().to_string()
            }
            _ => ctx.user_id().to_string(),
        };
        row.set_owner(owner);
        row
    }

    fn violation<T: Owned>(&self, ctx: &AccessContext, row: &T) -> AuthError {
        tracing::warn!(
            user_id = %ctx.user_id(),
            role = %ctx.principal().role_name,
            resource = %row.resource_kind(),
            id = %row.resource_id(),
            "ownership violation"
        );
        AuthError::OwnershipViolation {
            resource: row.resource_kind().to_string(),
            id: row.resource_id().to_string(),
        }
    }
}
