//! Environment-driven database configuration
//!
//! Credentials come from `DB_*` process environment variables (a `.env` file
//! is honored); transport-encryption settings come from the libpq-style
//! `PGSSL*` variables handled in [`crate::tls`].

use crate::conn::ConnectOptions;
use crate::error::{Error, Result};
use crate::tls::TlsSettings;

/// Default PostgreSQL port used when `DB_PORT` is unset
pub const DEFAULT_PORT: u16 = 5432;

/// Database credentials and target, typically loaded from the environment
#[derive(Clone)]
pub struct DbConfig {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub database: String,
    /// User name
    pub user: String,
    /// Password
    pub password: String,
    /// Application name reported to the server
    pub application_name: Option<String>,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl DbConfig {
    /// Load configuration from the process environment.
    ///
    /// Reads `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD` and
    /// the optional `DB_APPLICATION_NAME`. A `.env` file in the working
    /// directory (or any parent) is loaded first if present.
    ///
    /// Every missing required variable is reported in a single error so a
    /// misconfigured environment can be fixed in one pass.
    pub fn from_env() -> Result<Self> {
        // Missing .env files are fine; the variables may be set directly.
        let _ = dotenvy::dotenv();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), but with an explicit variable
    /// lookup. Used by tests to avoid touching the process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = ["DB_USER", "DB_PASSWORD", "DB_HOST", "DB_NAME"];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| lookup(name).map_or(true, |v| v.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(Error::config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let port = match lookup("DB_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                Error::config(format!("invalid DB_PORT '{raw}': expected a port number"))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: lookup("DB_HOST").unwrap_or_default(),
            port,
            database: lookup("DB_NAME").unwrap_or_default(),
            user: lookup("DB_USER").unwrap_or_default(),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            application_name: lookup("DB_APPLICATION_NAME"),
        })
    }

    /// Combine with TLS settings into connectable options
    pub fn connect_options(self, tls: TlsSettings) -> ConnectOptions {
        let mut options = ConnectOptions::new(self.host, self.database, self.user, self.password)
            .with_port(self.port)
            .with_tls(tls);
        if let Some(app) = self.application_name {
            options = options.with_application_name(app);
        }
        options
    }

    /// Connect options from the environment in one step: `DB_*` credentials
    /// plus `PGSSL*` transport settings.
    pub fn options_from_env() -> Result<ConnectOptions> {
        let config = Self::from_env()?;
        let tls = TlsSettings::from_env()?;
        Ok(config.connect_options(tls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_all_missing_vars_reported_together() {
        let err = DbConfig::from_vars(|_| None).unwrap_err();
        let message = err.to_string();
        for name in ["DB_USER", "DB_PASSWORD", "DB_HOST", "DB_NAME"] {
            assert!(message.contains(name), "missing {name} in: {message}");
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let env = vars(&[
            ("DB_USER", "u"),
            ("DB_PASSWORD", ""),
            ("DB_HOST", "localhost"),
            ("DB_NAME", "analytics"),
        ]);
        let err = DbConfig::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("DB_PASSWORD"));
        assert!(!err.to_string().contains("DB_USER"));
    }

    #[test]
    fn test_port_defaults() {
        let env = vars(&[
            ("DB_USER", "u"),
            ("DB_PASSWORD", "p"),
            ("DB_HOST", "localhost"),
            ("DB_NAME", "analytics"),
        ]);
        let config = DbConfig::from_vars(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_port() {
        let env = vars(&[
            ("DB_USER", "u"),
            ("DB_PASSWORD", "p"),
            ("DB_HOST", "localhost"),
            ("DB_NAME", "analytics"),
            ("DB_PORT", "not-a-port"),
        ]);
        let err = DbConfig::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let env = vars(&[
            ("DB_USER", "u"),
            ("DB_PASSWORD", "hunter2"),
            ("DB_HOST", "localhost"),
            ("DB_NAME", "analytics"),
        ]);
        let config = DbConfig::from_vars(|k| env.get(k).cloned()).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
