use std::path::{Path, PathBuf};

use sqlsage_common::{Error, Result};
use tracing::info;

use crate::model::AppConfig;

pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_dir: Self::default_config_dir(),
        }
    }

    pub fn default_config_dir() -> PathBuf {
        let home_config = dirs::home_dir().map(|h| h.join(".sqlsage"));
        let xdg_config = dirs::config_dir().map(|c| c.join("sqlsage"));

        match (xdg_config, home_config) {
            (Some(xdg), Some(home)) => {
                // Prefer XDG; fall back to an existing ~/.sqlsage.
                if !xdg.exists() && home.exists() {
                    home
                } else {
                    xdg
                }
            }
            (Some(xdg), None) => xdg,
            (None, Some(home)) => home,
            (None, None) => PathBuf::from(".sqlsage"),
        }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns true if a config file (YAML or TOML) exists on disk.
    pub fn config_file_exists(&self) -> bool {
        self.config_dir.join("config.yml").exists() || self.config_dir.join("config.toml").exists()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let yaml_path = self.config_dir.join("config.yml");
        let toml_path = self.config_dir.join("config.toml");

        if yaml_path.exists() {
            info!("loading config from {}", yaml_path.display());
            let contents = std::fs::read_to_string(&yaml_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))
        } else if toml_path.exists() {
            info!("loading config from {}", toml_path.display());
            let contents = std::fs::read_to_string(&toml_path)?;
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))
        } else {
            info!("no config file found, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// Create the config directory and write a starter `config.yml` if none exists.
    /// Returns the path of the starter file when one was written.
    pub fn init(&self) -> Result<Option<PathBuf>> {
        std::fs::create_dir_all(&self.config_dir)?;
        if self.config_file_exists() {
            return Ok(None);
        }

        let path = self.config_dir.join("config.yml");
        std::fs::write(&path, STARTER_CONFIG)?;
        info!("wrote starter config to {}", path.display());
        Ok(Some(path))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

const STARTER_CONFIG: &str = r#"gateway:
  host: 127.0.0.1
  port: 3000

llm:
  main:
    provider: azure
    model: gpt-4o
    base_url: https://YOUR-RESOURCE.openai.azure.com
    api_version: 2024-06-01
  small:
    provider: azure
    model: gpt-4o-mini
    base_url: https://YOUR-RESOURCE.openai.azure.com
    api_version: 2024-06-01

embeddings:
  default:
    provider: azure
    model: text-embedding-3-small
    base_url: https://YOUR-RESOURCE.openai.azure.com
    api_version: 2024-06-01

agents:
  retrieval_provider: main
  generation_provider: small
  embedding_provider: default

search:
  url: https://YOUR-PROJECT.supabase.co

database:
  path: ./data/target.db

sandbox:
  timeout_ms: 30000
  max_rows: 1000
  allowed_statements: [SELECT, WITH]
"#;
