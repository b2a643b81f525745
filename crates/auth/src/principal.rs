use serde::{Deserialize, Serialize};

use gatehouse_core::UserId;

/// The caller as seen by handlers once the middleware let a request through.
///
/// Roles come from the store at request time, not from the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedSubject {
    pub id: UserId,
    pub display_name: String,
    /// Primary role embedded in the token at issuance.
    pub token_role: String,
    pub roles: Vec<String>,
}
