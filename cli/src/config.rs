use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use aquakeeper_core::chemistry::DEFAULT_NH3_WARNING_MG_L;
use aquakeeper_core::compatibility::AdditionPolicy;
use aquakeeper_core::service::ServiceSettings;
use aquakeeper_core::species::SpeciesTable;
use directories::ProjectDirs;
use serde::Deserialize;

const CONFIG_FILE: &str = "config.toml";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Optional keys read from `config.toml` in the data directory.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    telegram_token: Option<String>,
    database_path: Option<PathBuf>,
    species_file: Option<PathBuf>,
    block_incompatible: Option<bool>,
    nh3_warning_mg_l: Option<f64>,
    session_ttl_secs: Option<u64>,
    public_url: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub species_file: Option<PathBuf>,
    pub telegram_token: Option<String>,
    pub block_incompatible: bool,
    pub nh3_warning_mg_l: f64,
    pub session_ttl_secs: u64,
    pub public_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "aquakeeper").context("Could not determine home directory")?;
        let mut config = Self::from_dir(proj_dirs.data_dir())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Build the configuration rooted at `data_dir`, reading `config.toml` if present.
    pub fn from_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let path = data_dir.join(CONFIG_FILE);
        let file: FileConfig = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))?
        } else {
            FileConfig::default()
        };

        let nh3_warning_mg_l = file.nh3_warning_mg_l.unwrap_or(DEFAULT_NH3_WARNING_MG_L);
        if !nh3_warning_mg_l.is_finite() || nh3_warning_mg_l <= 0.0 {
            anyhow::bail!("nh3_warning_mg_l must be greater than 0");
        }
        let session_ttl_secs = file.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS);
        if session_ttl_secs == 0 {
            anyhow::bail!("session_ttl_secs must be greater than 0");
        }

        Ok(Config {
            db_path: file
                .database_path
                .unwrap_or_else(|| data_dir.join("aquakeeper.db")),
            data_dir: data_dir.to_path_buf(),
            species_file: file.species_file,
            telegram_token: file.telegram_token,
            block_incompatible: file.block_incompatible.unwrap_or(false),
            nh3_warning_mg_l,
            session_ttl_secs,
            public_url: file.public_url,
        })
    }

    /// Environment variables win over the config file.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(token) = var("AQUAKEEPER_TELEGRAM_TOKEN").or_else(|| var("TELEGRAM_TOKEN")) {
            self.telegram_token = Some(token);
        }
        if let Some(db) = var("AQUAKEEPER_DB") {
            self.db_path = PathBuf::from(db);
        }
    }

    pub fn telegram_token(&self) -> Result<&str> {
        self.telegram_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .context(
                "No Telegram bot token configured. Set AQUAKEEPER_TELEGRAM_TOKEN or telegram_token in config.toml",
            )
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            addition_policy: if self.block_incompatible {
                AdditionPolicy::Block
            } else {
                AdditionPolicy::Warn
            },
            nh3_warning_mg_l: self.nh3_warning_mg_l,
        }
    }

    pub fn species_table(&self) -> Result<SpeciesTable> {
        match &self.species_file {
            Some(path) => SpeciesTable::from_path(path),
            None => SpeciesTable::builtin(),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Load the webhook secret from disk, or generate a new one.
    ///
    /// Telegram echoes it back in `X-Telegram-Bot-Api-Secret-Token` on every
    /// webhook call.
    pub fn load_or_create_webhook_secret(&self) -> Result<String> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("webhook_secret");

        if path.exists() {
            let secret =
                std::fs::read_to_string(&path).context("Failed to read webhook secret file")?;
            let secret = secret.trim().to_string();
            if !secret.is_empty() {
                return Ok(secret);
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let secret = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &secret).context("Failed to write webhook secret file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set webhook secret file permissions")?;
        }
        tracing::info!(path = %path.display(), "generated new webhook secret");
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_dir(dir.path()).unwrap();
        assert_eq!(config.db_path, dir.path().join("aquakeeper.db"));
        assert!(!config.block_incompatible);
        assert!((config.nh3_warning_mg_l - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.session_ttl(), Duration::from_secs(3600));
        assert!(config.telegram_token().is_err());
        assert_eq!(
            config.service_settings().addition_policy,
            AdditionPolicy::Warn
        );
        assert!(config.species_table().unwrap().find("неон").is_some());
    }

    #[test]
    fn test_config_file_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
telegram_token = "123:abc"
block_incompatible = true
nh3_warning_mg_l = 0.02
session_ttl_secs = 60
public_url = "https://example.org"
"#,
        )
        .unwrap();
        let config = Config::from_dir(dir.path()).unwrap();
        assert_eq!(config.telegram_token().unwrap(), "123:abc");
        assert_eq!(
            config.service_settings().addition_policy,
            AdditionPolicy::Block
        );
        assert!((config.service_settings().nh3_warning_mg_l - 0.02).abs() < f64::EPSILON);
        assert_eq!(config.session_ttl_secs, 60);
        assert_eq!(config.public_url.as_deref(), Some("https://example.org"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "telegram_tokn = \"x\"\n").unwrap();
        assert!(Config::from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "nh3_warning_mg_l = 0.0\n").unwrap();
        assert!(Config::from_dir(dir.path()).is_err());
    }

    #[test]
    fn test_zero_session_ttl_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "session_ttl_secs = 0\n").unwrap();
        let err = Config::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("session_ttl_secs"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "telegram_token = \"file\"\n").unwrap();
        let mut config = Config::from_dir(dir.path()).unwrap();
        config.apply_env(|key| match key {
            "TELEGRAM_TOKEN" => Some("env".to_string()),
            "AQUAKEEPER_DB" => Some("/tmp/other.db".to_string()),
            _ => None,
        });
        assert_eq!(config.telegram_token().unwrap(), "env");
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn test_webhook_secret_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_dir(dir.path()).unwrap();
        let first = config.load_or_create_webhook_secret().unwrap();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        let second = config.load_or_create_webhook_secret().unwrap();
        assert_eq!(first, second);
    }
}
