//! Process-level settings for the HTTP server.

use std::net::SocketAddr;

use gatehouse_auth::ConfigError;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Durable stores (Postgres). In-memory stores when absent.
    pub database_url: Option<String>,
    /// Session cache (Redis). Only consulted together with `database_url`.
    pub redis_url: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup("GATEHOUSE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw.trim().parse().map_err(|e| ConfigError::Invalid {
            key: "GATEHOUSE_BIND_ADDR",
            reason: format!("{e}"),
        })?;

        Ok(Self {
            bind_addr,
            database_url: non_empty(lookup("DATABASE_URL")),
            redis_url: non_empty(lookup("REDIS_URL")),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory_on_port_8080() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.redis_url, None);
    }

    #[test]
    fn blank_urls_count_as_absent() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/gatehouse"),
            ("REDIS_URL", "  "),
            ("GATEHOUSE_BIND_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/gatehouse"));
        assert_eq!(cfg.redis_url, None);
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn rejects_unparseable_bind_addr() {
        let err = ServerConfig::from_lookup(lookup(&[("GATEHOUSE_BIND_ADDR", "localhost")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GATEHOUSE_BIND_ADDR", .. }));
    }
}
