//! Explicitly constructed configuration for the token codec and session manager.
//!
//! Nothing in this crate reads process-global state; the binary builds one
//! [`AuthConfig`] at startup and hands it to every component that needs it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_ROLE: &str = "user";

/// Recommended minimum HS256 secret length.
pub const MIN_SECRET_LEN: usize = 32;

/// What the authorization middleware does with a request whose route has no
/// (resource, action) mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmappedRoutePolicy {
    /// Skip the permission check (authentication still applies).
    #[default]
    DefaultAllow,
    /// Reject with "forbidden".
    DefaultDeny,
}

impl core::str::FromStr for UnmappedRoutePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default-allow" | "allow" => Ok(Self::DefaultAllow),
            "default-deny" | "deny" => Ok(Self::DefaultDeny),
            other => Err(ConfigError::Invalid {
                key: "GATEHOUSE_UNMAPPED_ROUTES",
                reason: format!("expected default-allow or default-deny, got '{other}'"),
            }),
        }
    }
}

/// Administrator account created on first start when it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared HS256 secret. Rotating it invalidates every issued access token
    /// at once; there is no grace window.
    #[serde(skip_serializing)]
    pub jwt_secret: String,

    #[serde(with = "duration_ms", default = "defaults::access_ttl")]
    pub access_token_ttl: Duration,

    #[serde(with = "duration_ms", default = "defaults::refresh_ttl")]
    pub refresh_token_ttl: Duration,

    /// Upper bound on any single store call.
    #[serde(with = "duration_ms", default = "defaults::store_timeout")]
    pub store_timeout: Duration,

    #[serde(default)]
    pub unmapped_route_policy: UnmappedRoutePolicy,

    /// Role assigned to every newly registered subject.
    #[serde(default = "defaults::default_role")]
    pub default_role: String,

    /// Interval of the expired-session sweeper; `None` disables it.
    #[serde(with = "opt_duration_ms", default)]
    pub session_sweep_interval: Option<Duration>,

    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,

    #[serde(default = "defaults::bcrypt_cost")]
    pub password_hash_cost: u32,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            unmapped_route_policy: UnmappedRoutePolicy::default(),
            default_role: DEFAULT_ROLE.to_string(),
            session_sweep_interval: None,
            bootstrap_admin: None,
            password_hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_unmapped_route_policy(mut self, policy: UnmappedRoutePolicy) -> Self {
        self.unmapped_route_policy = policy;
        self
    }

    pub fn with_password_hash_cost(mut self, cost: u32) -> Self {
        self.password_hash_cost = cost;
        self
    }

    pub fn with_bootstrap_admin(mut self, admin: BootstrapAdmin) -> Self {
        self.bootstrap_admin = Some(admin);
        self
    }

    /// Build from `GATEHOUSE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, test map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("GATEHOUSE_JWT_SECRET").ok_or(ConfigError::Missing("GATEHOUSE_JWT_SECRET"))?;
        let mut config = Self::new(secret);

        if let Some(v) = lookup("GATEHOUSE_ACCESS_TTL_SECS") {
            config.access_token_ttl = Duration::from_secs(parse_u64("GATEHOUSE_ACCESS_TTL_SECS", &v)?);
        }
        if let Some(v) = lookup("GATEHOUSE_REFRESH_TTL_SECS") {
            config.refresh_token_ttl = Duration::from_secs(parse_u64("GATEHOUSE_REFRESH_TTL_SECS", &v)?);
        }
        if let Some(v) = lookup("GATEHOUSE_STORE_TIMEOUT_MS") {
            config.store_timeout = Duration::from_millis(parse_u64("GATEHOUSE_STORE_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("GATEHOUSE_UNMAPPED_ROUTES") {
            config.unmapped_route_policy = v.parse()?;
        }
        if let Some(v) = lookup("GATEHOUSE_DEFAULT_ROLE") {
            config.default_role = v;
        }
        if let Some(v) = lookup("GATEHOUSE_SESSION_SWEEP_SECS") {
            let secs = parse_u64("GATEHOUSE_SESSION_SWEEP_SECS", &v)?;
            config.session_sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = lookup("GATEHOUSE_BCRYPT_COST") {
            let cost = parse_u64("GATEHOUSE_BCRYPT_COST", &v)?;
            config.password_hash_cost = u32::try_from(cost).map_err(|_| ConfigError::Invalid {
                key: "GATEHOUSE_BCRYPT_COST",
                reason: format!("{cost} is out of range"),
            })?;
        }

        let admin_email = lookup("GATEHOUSE_BOOTSTRAP_ADMIN_EMAIL");
        let admin_password = lookup("GATEHOUSE_BOOTSTRAP_ADMIN_PASSWORD");
        match (admin_email, admin_password) {
            (Some(email), Some(password)) => {
                config.bootstrap_admin = Some(BootstrapAdmin {
                    username: lookup("GATEHOUSE_BOOTSTRAP_ADMIN_USERNAME")
                        .unwrap_or_else(|| "admin".to_string()),
                    email,
                    password,
                });
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::Invalid {
                    key: "GATEHOUSE_BOOTSTRAP_ADMIN_EMAIL",
                    reason: "bootstrap admin needs both email and password".to_string(),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::Missing("GATEHOUSE_JWT_SECRET"));
        }
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            tracing::warn!("JWT secret is shorter than {MIN_SECRET_LEN} bytes");
        }
        if self.access_token_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                key: "GATEHOUSE_ACCESS_TTL_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.refresh_token_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                key: "GATEHOUSE_REFRESH_TTL_SECS",
                reason: "must be positive".to_string(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "GATEHOUSE_STORE_TIMEOUT_MS",
                reason: "must be positive".to_string(),
            });
        }
        if self.session_sweep_interval.is_some_and(|every| every.is_zero()) {
            return Err(ConfigError::Invalid {
                key: "GATEHOUSE_SESSION_SWEEP_SECS",
                reason: "must be positive; leave unset to disable sweeping".to_string(),
            });
        }
        if !(4..=31).contains(&self.password_hash_cost) {
            return Err(ConfigError::Invalid {
                key: "GATEHOUSE_BCRYPT_COST",
                reason: "bcrypt cost must be between 4 and 31".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{e}"),
    })
}

mod defaults {
    use std::time::Duration;

    pub fn access_ttl() -> Duration {
        super::DEFAULT_ACCESS_TOKEN_TTL
    }

    pub fn refresh_ttl() -> Duration {
        super::DEFAULT_REFRESH_TOKEN_TTL
    }

    pub fn store_timeout() -> Duration {
        super::DEFAULT_STORE_TIMEOUT
    }

    pub fn default_role() -> String {
        super::DEFAULT_ROLE.to_string()
    }

    pub fn bcrypt_cost() -> u32 {
        bcrypt::DEFAULT_COST
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
