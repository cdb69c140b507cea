//! `gloria-auth`: authentication/authorization boundary.
//!
//! Token claims, the RBAC model (scopes, permissions, roles, grants), the
//! permission resolver and the employee account aggregate. Decoupled from
//! HTTP and storage: the resolver reads through the [`PolicySource`] trait.

pub mod catalog;
pub mod claims;
pub mod grants;
pub mod permissions;
pub mod principal;
pub mod resolver;
pub mod roles;
pub mod scope;
pub mod user;

pub use catalog::{Catalog, PermissionSeed, RoleSeed};
pub use claims::{Hs256TokenVerifier, IdentityClaims, TokenValidationError, TokenVerifier, validate_claims};
pub use grants::{AccessContext, Condition, RoleAssignment, RolePermission, UserPermission};
pub use permissions::{Permission, PermissionKey};
pub use principal::Principal;
pub use resolver::{
    Candidate, Decision, DecisionReason, EffectivePermission, Explanation, GrantSource,
    PermissionResolver, PolicyError, PolicySource,
};
pub use roles::{Role, MAX_ROLE_DEPTH};
pub use scope::Scope;
pub use user::{
    ActivateUser, CreateUser, ProfileUpdate, SuspendUser, TerminateUser, UpdateProfile, User,
    UserCommand, UserEvent, UserProfile, UserStatus,
};
