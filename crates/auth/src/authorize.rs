//! Effective-permission resolution.
//!
//! `effective = (role grants ∪ direct grants) − direct denials`
//!
//! This module is pure: it works on a [`SubjectGrants`] snapshot loaded by a
//! store in one read, and never caches across calls.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use gatehouse_core::{PermissionId, UserId};

use crate::{Capability, Permission, Role};

/// Everything that contributes to one subject's permissions, read at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectGrants {
    /// Currently assigned roles, in assignment order.
    pub roles: Vec<Role>,
    /// `(role name, permission)` for every permission carried by those roles.
    pub role_permissions: Vec<(String, Permission)>,
    /// `(permission, is_denied)` direct rows; at most one per permission.
    pub direct: Vec<(Permission, bool)>,
}

impl SubjectGrants {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.name.clone()).collect()
    }
}

/// The resolved permission set of a subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    permissions: BTreeMap<PermissionId, Permission>,
}

impl EffectivePermissions {
    pub fn allows(&self, capability: Capability) -> bool {
        self.permissions.values().any(|p| p.capability() == capability)
    }

    pub fn contains(&self, id: PermissionId) -> bool {
        self.permissions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.values()
    }

    pub fn into_vec(self) -> Vec<Permission> {
        self.permissions.into_values().collect()
    }
}

/// Compute the effective set.
///
/// A denial removes its capability outright: any other permission row with
/// the same (resource, action), whether role-derived or directly granted, is
/// removed with it.
pub fn resolve_effective(grants: &SubjectGrants) -> EffectivePermissions {
    let denied: BTreeSet<Capability> = grants
        .direct
        .iter()
        .filter(|(_, is_denied)| *is_denied)
        .map(|(p, _)| p.capability())
        .collect();

    let permissions = grants
        .role_permissions
        .iter()
        .map(|(_, p)| p)
        .chain(grants.direct.iter().filter(|(_, d)| !*d).map(|(p, _)| p))
        .filter(|p| !denied.contains(&p.capability()))
        .map(|p| (p.id, p.clone()))
        .collect();

    EffectivePermissions { permissions }
}

/// Membership test without materializing the whole set.
pub fn check(grants: &SubjectGrants, capability: Capability) -> bool {
    if grants
        .direct
        .iter()
        .any(|(p, denied)| *denied && p.capability() == capability)
    {
        return false;
    }
    grants.role_permissions.iter().any(|(_, p)| p.capability() == capability)
        || grants
            .direct
            .iter()
            .any(|(p, denied)| !*denied && p.capability() == capability)
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Why a check came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    /// Explicit denial present; overrides every grant listed.
    DeniedExplicitly {
        denied_by: Vec<String>,
        overridden_roles: Vec<String>,
        overridden_direct: bool,
    },
    GrantedByRole { roles: Vec<String> },
    GrantedDirectly { permissions: Vec<String> },
    GrantedByRoleAndDirectly {
        roles: Vec<String>,
        permissions: Vec<String>,
    },
    NoGrant,
}

/// Detailed, serializable explanation of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationExplanation {
    pub user_id: UserId,
    pub resource: String,
    pub action: String,
    pub granted: bool,
    pub reason: DecisionReason,
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Explain the decision [`check`] would make for `capability`.
pub fn explain(user_id: UserId, grants: &SubjectGrants, capability: Capability) -> AuthorizationExplanation {
    let granting_roles: Vec<String> = grants
        .role_permissions
        .iter()
        .filter(|(_, p)| p.capability() == capability)
        .map(|(role, _)| role.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let direct_grants: Vec<String> = grants
        .direct
        .iter()
        .filter(|(p, denied)| !*denied && p.capability() == capability)
        .map(|(p, _)| p.name.clone())
        .collect();
    let denials: Vec<String> = grants
        .direct
        .iter()
        .filter(|(p, denied)| *denied && p.capability() == capability)
        .map(|(p, _)| p.name.clone())
        .collect();

    let mut effective: Vec<String> = resolve_effective(grants).iter().map(|p| p.name.clone()).collect();
    effective.sort();

    let (granted, reason, suggestions) = if !denials.is_empty() {
        (
            false,
            DecisionReason::DeniedExplicitly {
                denied_by: denials,
                overridden_roles: granting_roles,
                overridden_direct: !direct_grants.is_empty(),
            },
            vec![format!(
                "Remove the direct denial of '{capability}' for this subject"
            )],
        )
    } else {
        match (granting_roles.is_empty(), direct_grants.is_empty()) {
            (false, true) => (true, DecisionReason::GrantedByRole { roles: granting_roles }, vec![]),
            (true, false) => (
                true,
                DecisionReason::GrantedDirectly {
                    permissions: direct_grants,
                },
                vec![],
            ),
            (false, false) => (
                true,
                DecisionReason::GrantedByRoleAndDirectly {
                    roles: granting_roles,
                    permissions: direct_grants,
                },
                vec![],
            ),
            (true, true) => (
                false,
                DecisionReason::NoGrant,
                vec![
                    format!("Assign a role that grants '{capability}'"),
                    format!("Grant '{capability}' directly to the subject"),
                ],
            ),
        }
    };

    AuthorizationExplanation {
        user_id,
        resource: capability.resource.to_string(),
        action: capability.action.to_string(),
        granted,
        reason,
        roles: grants.role_names(),
        effective_permissions: effective,
        suggestions,
    }
}
