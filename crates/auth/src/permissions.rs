use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::PermissionId;

use crate::AuthError;

macro_rules! closed_vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $name {
            type Err = AuthError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AuthError::InvalidPermissionSpec(format!(
                        "unknown {} '{}'",
                        $label, other
                    ))),
                }
            }
        }
    };
}

closed_vocabulary! {
    /// Resource kinds a permission can refer to.
    Resource, "resource" {
        User => "user",
        Profile => "profile",
        File => "file",
        Job => "job",
        System => "system",
        Email => "email",
        Api => "api",
    }
}

closed_vocabulary! {
    /// Actions a permission can allow on a resource.
    Action, "action" {
        Create => "create",
        Read => "read",
        Update => "update",
        Delete => "delete",
        Manage => "manage",
        Send => "send",
        Dashboard => "dashboard",
        Settings => "settings",
        Logs => "logs",
        Backup => "backup",
        Access => "access",
        Admin => "admin",
    }
}

/// The (resource, action) pair a permission grants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    pub resource: Resource,
    pub action: Action,
}

impl Capability {
    pub const fn new(resource: Resource, action: Action) -> Self {
        Self { resource, action }
    }

    /// Parse an unvalidated pair. Either half outside its vocabulary is an
    /// [`AuthError::InvalidPermissionSpec`].
    pub fn parse(resource: &str, action: &str) -> Result<Self, AuthError> {
        Ok(Self {
            resource: resource.parse()?,
            action: action.parse()?,
        })
    }

    /// Conventional permission name, e.g. `file.delete`.
    pub fn canonical_name(&self) -> String {
        format!("{}.{}", self.resource, self.action)
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.resource, self.action)
    }
}

/// Input for `CreatePermission`, validated before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub resource: String,
    pub action: String,
}

/// A [`PermissionSpec`] that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPermissionSpec {
    pub name: String,
    pub description: String,
    pub capability: Capability,
}

impl PermissionSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn validate(&self) -> Result<ValidPermissionSpec, AuthError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidPermissionSpec("name cannot be empty".to_string()));
        }
        if name.len() > 100 {
            return Err(AuthError::InvalidPermissionSpec(
                "name longer than 100 characters".to_string(),
            ));
        }
        let capability = Capability::parse(self.resource.trim(), self.action.trim())?;
        Ok(ValidPermissionSpec {
            name: name.to_string(),
            description: self.description.trim().to_string(),
            capability,
        })
    }
}

/// A persisted permission. Identity and capability never change once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub description: String,
    pub resource: Resource,
    pub action: Action,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn from_spec(spec: ValidPermissionSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: PermissionId::new(),
            name: spec.name,
            description: spec.description,
            resource: spec.capability.resource,
            action: spec.capability.action,
            created_at: now,
        }
    }

    pub fn capability(&self) -> Capability {
        Capability::new(self.resource, self.action)
    }
}

/// Default permission catalog: `(name, description, resource, action)`.
pub const DEFAULT_PERMISSIONS: &[(&str, &str, Resource, Action)] = &[
    ("user.create", "Create users", Resource::User, Action::Create),
    ("user.read", "View users", Resource::User, Action::Read),
    ("user.update", "Update users", Resource::User, Action::Update),
    ("user.delete", "Delete users", Resource::User, Action::Delete),
    ("user.manage", "Manage users", Resource::User, Action::Manage),
    ("profile.read", "View profiles", Resource::Profile, Action::Read),
    ("profile.update", "Update profiles", Resource::Profile, Action::Update),
    ("file.create", "Upload files", Resource::File, Action::Create),
    ("file.read", "View files", Resource::File, Action::Read),
    ("file.update", "Update files", Resource::File, Action::Update),
    ("file.delete", "Delete files", Resource::File, Action::Delete),
    ("file.manage", "Manage files", Resource::File, Action::Manage),
    ("job.create", "Create jobs", Resource::Job, Action::Create),
    ("job.read", "View jobs", Resource::Job, Action::Read),
    ("job.update", "Update jobs", Resource::Job, Action::Update),
    ("job.delete", "Delete jobs", Resource::Job, Action::Delete),
    ("job.manage", "Manage jobs", Resource::Job, Action::Manage),
    ("system.dashboard", "View the system dashboard", Resource::System, Action::Dashboard),
    ("system.settings", "Change system settings", Resource::System, Action::Settings),
    ("system.logs", "View system logs", Resource::System, Action::Logs),
    ("system.backup", "Run system backups", Resource::System, Action::Backup),
    ("email.send", "Send email", Resource::Email, Action::Send),
    ("email.read", "View email", Resource::Email, Action::Read),
    ("email.manage", "Manage email", Resource::Email, Action::Manage),
    ("api.access", "Access the API", Resource::Api, Action::Access),
    ("api.admin", "Administer the API", Resource::Api, Action::Admin),
];

/// Catalog entries granted to the default `user` role.
pub const DEFAULT_USER_PERMISSIONS: &[&str] = &[
    "profile.read",
    "profile.update",
    "file.create",
    "file.read",
    "file.update",
    "file.delete",
    "job.create",
    "job.read",
    "email.send",
    "email.read",
    "api.access",
];
