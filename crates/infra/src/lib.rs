//! Infrastructure layer: store adapters and the services built on them.
//!
//! Services depend only on the store traits; which backend serves a call is
//! decided once at startup.

pub mod credentials;
pub mod error;
pub mod permissions;
pub mod postgres;
pub mod services;
pub mod sessions;
pub mod sweeper;
pub mod timeout;

pub use credentials::{CredentialStore, InMemoryCredentialStore, PostgresCredentialStore, SubjectPage};
pub use error::StoreError;
pub use permissions::{
    AssignOutcome, DeleteRoleOutcome, InMemoryPermissionStore, PermissionFilter, PermissionStats, PermissionStore,
    PostgresPermissionStore,
};
pub use services::{AuthOutcome, PermissionEngine, SeedReport, SessionLifecycle, TokenPair};
#[cfg(feature = "redis")]
pub use sessions::RedisSessionStore;
pub use sessions::{
    InMemorySessionStore, PostgresSessionStore, RotateOutcome, SessionStore, select_session_store,
};
pub use sweeper::{MIN_SWEEP_INTERVAL, SweeperHandle, spawn_session_sweeper};
