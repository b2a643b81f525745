//! Static mapping from (HTTP method, path) to the capability a route requires.

use serde::{Deserialize, Serialize};

use crate::{Action, Capability, Resource};

/// One path prefix and the resource it protects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub resource: Resource,
}

impl RouteRule {
    pub fn new(prefix: impl Into<String>, resource: Resource) -> Self {
        Self {
            prefix: prefix.into(),
            resource,
        }
    }

    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Ordered list of [`RouteRule`]s; the first matching prefix wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            RouteRule::new("/api/admin/users", Resource::User),
            RouteRule::new("/api/admin/dashboard", Resource::System),
            RouteRule::new("/api/admin/jobs", Resource::Job),
            RouteRule::new("/api/admin/llm", Resource::Api),
            RouteRule::new("/api/vf/v1/profile", Resource::Profile),
            RouteRule::new("/api/vf/v1/files", Resource::File),
            RouteRule::new("/api/vf/v1/email", Resource::Email),
        ])
    }
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// `None` means the route is unmapped.
    pub fn resolve(&self, method: &str, path: &str) -> Option<Capability> {
        let path = normalize_path(path);
        let rule = self.rules.iter().find(|r| r.matches(path))?;

        let action = if path.contains("/dashboard") {
            Action::Dashboard
        } else {
            action_for_method(method)
        };
        Some(Capability::new(rule.resource, action))
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    path.strip_suffix('/').unwrap_or(path)
}

fn action_for_method(method: &str) -> Action {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Action::Read,
        "POST" => Action::Create,
        "PUT" | "PATCH" => Action::Update,
        "DELETE" => Action::Delete,
        _ => Action::Access,
    }
}
