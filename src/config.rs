//! Configuration loaded from `config.yml` with environment overrides.
//!
//! Every section is optional; a missing file yields a runnable default
//! configuration. `HOST` and `PORT` environment variables override the
//! listener bind.

use std::path::Path;

use anyhow::Context;
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminSection {
    /// Admin password; generated at startup when absent.
    pub password: Option<String>,
    /// When true the admin API router is not mounted at all.
    #[serde(default)]
    pub disable_ui: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Floor for per-service `check_frequency_minutes` (0 stays allowed).
    #[serde(default = "default_min_check_frequency")]
    pub min_check_frequency: i64,
}

impl Default for PollingSection {
    fn default() -> Self {
        PollingSection {
            interval_seconds: default_interval_seconds(),
            min_check_frequency: default_min_check_frequency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        DatabaseSection {
            url: default_database_url(),
        }
    }
}

/// A service seeded from configuration at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedService {
    pub name: String,
    pub upstream_url: String,
    #[serde(default = "default_seed_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub check_frequency_minutes: i64,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    admin: AdminSection,
    #[serde(default)]
    polling: PollingSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    services: Vec<SeedService>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub admin: AdminSection,
    pub polling: PollingSection,
    pub database: DatabaseSection,
    pub services: Vec<SeedService>,
    pub host: String,
    pub port: u16,
    /// Effective admin password, configured or generated.
    pub admin_password: String,
    /// True when `admin_password` was generated this boot and must be logged.
    pub password_generated: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_path(Path::new("config.yml"))
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file: FileConfig = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            FileConfig::default()
        };

        if file.polling.interval_seconds < 1 {
            anyhow::bail!("polling.interval_seconds must be >= 1");
        }

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().context("PORT must be a valid port number")?,
            Err(_) => 8000,
        };

        let (admin_password, password_generated) = match &file.admin.password {
            Some(password) => (password.trim().to_string(), false),
            None => (generate_password(), true),
        };

        Ok(Config {
            admin: file.admin,
            polling: file.polling,
            database: file.database,
            services: file.services,
            host,
            port,
            admin_password,
            password_generated,
        })
    }
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_min_check_frequency() -> i64 {
    5
}

fn default_database_url() -> String {
    "sqlite://mcp_guardian.db?mode=rwc".to_string()
}

fn default_seed_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::from_path(Path::new("/nonexistent/config.yml")).unwrap();
        assert_eq!(config.polling.interval_seconds, 60);
        assert_eq!(config.polling.min_check_frequency, 5);
        assert!(!config.admin.disable_ui);
        assert!(config.services.is_empty());
        assert!(config.password_generated);
        assert_eq!(config.admin_password.len(), 24);
    }

    #[test]
    fn yaml_sections_are_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            concat!(
                "admin:\n",
                "  password: hunter2\n",
                "polling:\n",
                "  interval_seconds: 10\n",
                "  min_check_frequency: 2\n",
                "services:\n",
                "  - name: svc1\n",
                "    upstream_url: http://127.0.0.1:9000/mcp\n",
                "    check_frequency_minutes: 5\n",
            )
        )
        .unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.admin_password, "hunter2");
        assert!(!config.password_generated);
        assert_eq!(config.polling.interval_seconds, 10);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].name, "svc1");
        assert!(config.services[0].enabled);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "polling:\n  interval_seconds: 0").unwrap();
        assert!(Config::from_path(file.path()).is_err());
    }
}
