use crate::prompts::{DEFAULT_MODEL, SYSTEM_INSTRUCTION};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini model identifier
    pub model: String,

    /// Base URL of the Generative Language API
    pub api_base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// API key stored in the config file; takes precedence over the environment
    pub api_key: Option<String>,

    /// Replaces the built-in HealthPal instruction when set
    pub system_instruction: Option<String>,

    pub connect_timeout_secs: u64,

    /// Tracing filter used when HEALTHPAL_LOG is not set
    pub log_level: String,

    pub ui: UiConfig,

    /// HealthPal home directory
    #[serde(skip)]
    pub home: PathBuf,
}

/// UI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub show_timestamps: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_timestamps: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: DEFAULT_MODEL.to_string(),
            api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "API_KEY".to_string(),
            api_key: None,
            system_instruction: None,
            connect_timeout_secs: 15,
            log_level: "info".to_string(),
            ui: UiConfig::default(),
            home: Self::default_home(),
        }
    }
}

impl Config {
    /// `~/.healthpal`, or `./.healthpal` when no home directory is known
    pub fn default_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".healthpal")
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_home().join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.home = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_home);

        Ok(config)
    }

    /// Save configuration to `config.toml` in the home directory
    pub fn save(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.home).context("Failed to create .healthpal directory")?;

        let config_path = self.config_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config file")?;
        Ok(config_path)
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn log_path(&self) -> PathBuf {
        self.home.join("healthpal.log")
    }

    pub fn system_instruction(&self) -> &str {
        self.system_instruction
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(SYSTEM_INSTRUCTION)
    }

    /// Whether a key is available from the file or the environment
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
            || std::env::var(&self.api_key_env).is_ok_and(|key| !key.trim().is_empty())
    }

    /// Human-readable summary with the key redacted
    pub fn describe(&self) -> String {
        let key_state = if self.api_key.is_some() {
            "set in config file".to_string()
        } else if self.has_api_key() {
            format!("read from ${}", self.api_key_env)
        } else {
            format!("missing (set ${})", self.api_key_env)
        };
        let instruction = if self.system_instruction.is_some() {
            "custom"
        } else {
            "built-in"
        };

        format!(
            "config file: {}\nmodel: {}\napi base url: {}\napi key: {}\nsystem instruction: {}\nlog file: {}",
            self.config_path().display(),
            self.model,
            self.api_base_url,
            key_state,
            instruction,
            self.log_path().display(),
        )
    }
}
