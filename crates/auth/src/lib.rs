//! `gatehouse-auth`: pure authentication/authorization boundary.
//!
//! Data model, vocabularies, effective-permission resolution, token codec and
//! password hashing. No storage, no HTTP.

pub mod authorize;
pub mod claims;
pub mod config;
pub mod error;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod route_table;
pub mod session;
pub mod subject;
pub mod token;

pub use authorize::{
    AuthorizationExplanation, DecisionReason, EffectivePermissions, SubjectGrants, check, explain,
    resolve_effective,
};
pub use claims::{AccessClaims, TokenValidationError, validate_claims};
pub use config::{AuthConfig, BootstrapAdmin, ConfigError, UnmappedRoutePolicy};
pub use error::{AuthError, ErrorClass};
pub use permissions::{
    Action, Capability, DEFAULT_PERMISSIONS, DEFAULT_USER_PERMISSIONS, Permission, PermissionSpec,
    Resource, ValidPermissionSpec,
};
pub use principal::AuthenticatedSubject;
pub use roles::{ADMIN_ROLE, DirectGrant, Role, RoleAssignment, RolePermission, validate_role_name};
pub use route_table::{RouteRule, RouteTable};
pub use session::{ClientMeta, Session, generate_refresh_token};
pub use subject::{
    PASSWORD_MAX_BYTES, Registration, Subject, SubjectStatus, ValidRegistration, normalize_email,
};
pub use token::{IssuedToken, TokenCodec};
