//! `gatehouse-core`: identity and error building blocks shared by every crate.
//!
//! This crate contains no IO and no policy.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{PermissionId, RoleId, UserId};
