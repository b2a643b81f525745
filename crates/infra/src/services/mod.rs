//! Services built on the store traits.

mod engine;
mod lifecycle;

pub use engine::{PermissionEngine, SeedReport};
pub use lifecycle::{AuthOutcome, SessionLifecycle, TokenPair};

#[cfg(test)]
mod scenarios;
