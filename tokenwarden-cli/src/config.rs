//! CLI configuration handling.
//!
//! Settings come from a TOML file (the platform config directory by default,
//! or `--config`) and are then overridden by command-line flags.

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokenwarden_core::ManagerConfig;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Full Vault address such as `https://vault.internal:8200`.
    ///
    /// `host`, `port` and `scheme` take precedence over its parts.
    pub addr: Option<String>,

    /// Vault host name or address.
    pub host: Option<String>,

    /// Vault port (default 8200).
    pub port: Option<u16>,

    /// URL scheme, `http` or `https` (default `http`).
    pub scheme: Option<String>,

    /// OIDC role the JWT is issued for.
    pub secret_id: Option<String>,

    /// Path to the seed document.
    pub seed_path: Option<PathBuf>,

    /// Fraction of the TTL after which renewal runs (default 0.75).
    pub renewal_factor: Option<f64>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: Option<u64>,

    /// Logging level used when `RUST_LOG` is unset.
    pub log_level: Option<String>,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub addr: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
    pub secret_id: Option<String>,
    pub seed_path: Option<PathBuf>,
    pub renewal_factor: Option<f64>,
}

impl CliConfig {
    /// Apply command-line overrides on top of file values.
    pub fn merge(mut self, overrides: Overrides) -> Self {
        self.addr = overrides.addr.or(self.addr);
        self.host = overrides.host.or(self.host);
        self.port = overrides.port.or(self.port);
        self.scheme = overrides.scheme.or(self.scheme);
        self.secret_id = overrides.secret_id.or(self.secret_id);
        self.seed_path = overrides.seed_path.or(self.seed_path);
        self.renewal_factor = overrides.renewal_factor.or(self.renewal_factor);
        self
    }

    /// Build the manager configuration, failing on missing required values.
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let addr = self.addr.as_deref().map(VaultAddr::parse).transpose()?;

        let Some(host) = self
            .host
            .clone()
            .or_else(|| addr.as_ref().map(|a| a.host.clone()))
        else {
            bail!("no Vault host configured (use --addr, --host or VAULT_ADDR)");
        };
        let Some(secret_id) = self.secret_id.as_deref() else {
            bail!("no secret id configured (use --secret-id or set `secret_id` in the config file)");
        };

        let mut config = ManagerConfig::new(host, secret_id);
        let scheme = self
            .scheme
            .clone()
            .or_else(|| addr.as_ref().map(|a| a.scheme.clone()));
        if let Some(scheme) = scheme {
            config = config.with_scheme(scheme);
        }
        if let Some(port) = self.port.or_else(|| addr.as_ref().and_then(|a| a.port)) {
            config = config.with_port(port);
        }
        if let Some(factor) = self.renewal_factor {
            config = config.with_renewal_factor(factor);
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }

        config.validate().context("invalid manager configuration")?;
        Ok(config)
    }

    pub fn seed_path(&self) -> Result<&Path> {
        self.seed_path
            .as_deref()
            .context("no seed document configured (use --seed or set `seed_path` in the config file)")
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// Parts of a `scheme://host[:port]` Vault address.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VaultAddr {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl VaultAddr {
    fn parse(addr: &str) -> Result<Self> {
        let url = Url::parse(addr)
            .with_context(|| format!("invalid Vault address '{}', expected scheme://host[:port]", addr))?;
        let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
            bail!("Vault address '{}' has no host", addr);
        };
        if !matches!(url.path(), "" | "/") || url.query().is_some() {
            bail!("Vault address '{}' must not contain a path or query", addr);
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port: url.port_or_known_default(),
        })
    }
}

/// Load configuration from `explicit`, the default location, or defaults.
///
/// An explicit path must exist; the default location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<CliConfig> {
    let (config_path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    if !config_path.exists() {
        if required {
            bail!("config file {:?} does not exist", config_path);
        }
        return Ok(CliConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {:?}", config_path))?;
    let mut config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config from {:?}", config_path))?;
    config.config_path = Some(config_path);
    Ok(config)
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("tokenwarden.toml"))
        .unwrap_or_else(|| PathBuf::from("tokenwarden.toml"))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "tokenwarden", "tokenwarden")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
host = "vault.internal"
port = 8443
scheme = "https"
secret_id = "edge-role"
seed_path = "/run/secrets/seed.json"
renewal_factor = 0.5
request_timeout_secs = 10
log_level = "debug"
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
        assert_eq!(config.log_level(), "debug");

        let manager = config.manager_config().unwrap();
        assert_eq!(manager.host, "vault.internal");
        assert_eq!(manager.port, 8443);
        assert_eq!(manager.scheme, "https");
        assert_eq!(manager.secret_id, "edge-role");
        assert!((manager.renewal_factor - 0.5).abs() < f64::EPSILON);
        assert_eq!(manager.request_timeout, Duration::from_secs(10));
        assert_eq!(
            config.seed_path().unwrap(),
            Path::new("/run/secrets/seed.json")
        );
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let file = CliConfig {
            host: Some("from-file".to_string()),
            secret_id: Some("file-role".to_string()),
            port: Some(9000),
            ..Default::default()
        };
        let merged = file.merge(Overrides {
            host: Some("from-flag".to_string()),
            ..Default::default()
        });

        let manager = merged.manager_config().unwrap();
        assert_eq!(manager.host, "from-flag");
        assert_eq!(manager.secret_id, "file-role");
        assert_eq!(manager.port, 9000);
    }

    #[test]
    fn test_addr_is_split_into_parts() {
        let config = CliConfig {
            secret_id: Some("role".to_string()),
            ..Default::default()
        }
        .merge(Overrides {
            addr: Some("https://vault.internal:8443".to_string()),
            ..Default::default()
        });

        let manager = config.manager_config().unwrap();
        assert_eq!(manager.scheme, "https");
        assert_eq!(manager.host, "vault.internal");
        assert_eq!(manager.port, 8443);
        assert_eq!(
            manager.base_url().unwrap().as_str(),
            "https://vault.internal:8443/"
        );
    }

    #[test]
    fn test_addr_without_port_uses_scheme_default() {
        let config = CliConfig {
            addr: Some("http://127.0.0.1".to_string()),
            secret_id: Some("role".to_string()),
            ..Default::default()
        };
        let manager = config.manager_config().unwrap();
        assert_eq!(manager.host, "127.0.0.1");
        assert_eq!(manager.port, 80);
    }

    #[test]
    fn test_explicit_parts_win_over_addr() {
        let config = CliConfig {
            addr: Some("http://127.0.0.1:8200".to_string()),
            host: Some("vault.internal".to_string()),
            port: Some(9200),
            secret_id: Some("role".to_string()),
            ..Default::default()
        };
        let manager = config.manager_config().unwrap();
        assert_eq!(manager.scheme, "http");
        assert_eq!(manager.host, "vault.internal");
        assert_eq!(manager.port, 9200);
    }

    #[test]
    fn test_bad_addr_rejected() {
        for addr in ["127.0.0.1:8200", "vault.internal", "http://vault/v1/sys", "http://"] {
            let config = CliConfig {
                addr: Some(addr.to_string()),
                secret_id: Some("role".to_string()),
                ..Default::default()
            };
            assert!(config.manager_config().is_err(), "addr {addr} should be rejected");
        }
    }

    #[test]
    fn test_full_url_in_host_rejected() {
        let config = CliConfig {
            host: Some("http://127.0.0.1:8200".to_string()),
            secret_id: Some("role".to_string()),
            ..Default::default()
        };
        assert!(config.manager_config().is_err());
    }

    #[test]
    fn test_missing_required_values() {
        let config = CliConfig::default();
        assert!(config.manager_config().is_err());
        assert!(config.seed_path().is_err());
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_invalid_factor_rejected() {
        let config = CliConfig {
            host: Some("vault".to_string()),
            secret_id: Some("role".to_string()),
            renewal_factor: Some(2.0),
            ..Default::default()
        };
        assert!(config.manager_config().is_err());
    }
}
