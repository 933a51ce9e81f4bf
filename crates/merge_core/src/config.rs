use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::error::MergeError;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Output language for dates and numbers.
///
/// `UK` and `US` write `1,234.56`; `NL` writes `1.234,56`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    #[default]
    UK,
    US,
    NL,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::UK => write!(f, "UK"),
            Language::US => write!(f, "US"),
            Language::NL => write!(f, "NL"),
        }
    }
}

impl FromStr for Language {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UK" | "GB" | "EN" => Ok(Language::UK),
            "US" => Ok(Language::US),
            "NL" => Ok(Language::NL),
            other => Err(MergeError::Config(format!(
                "unknown language '{other}' (expected UK, US or NL)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.mailmerge/config.json`.
///
/// Command-line flags override whatever is stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Language for long dates and number separators.
    pub language: Language,
    /// Leading text of every generated file name.
    pub file_prefix: String,
    /// Where generated documents go when no `--out` is given.
    pub output_dir: Option<PathBuf>,
    /// Package the documents into a single ZIP archive.
    pub zip_output: bool,
    /// Fail on unmapped placeholders and non-numeric amounts.
    pub strict: bool,
    /// Drop paragraphs and table rows that became empty after rendering.
    pub clean_empty: bool,
    pub log_level: String,
    /// Log file directory; `~/.mailmerge/logs/` when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            language: Language::UK,
            file_prefix: "Document".into(),
            output_dir: None,
            zip_output: false,
            strict: false,
            clean_empty: true,
            log_level: "info".into(),
            log_dir: None,
        }
    }
}

impl MergeConfig {
    /// Returns the base config directory: `~/.mailmerge/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".mailmerge"))
    }

    /// Returns the config file path: `~/.mailmerge/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.mailmerge/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// The configured log directory, or the default one.
    pub fn effective_logs_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::logs_dir(),
        }
    }

    /// Default output directory: `~/.mailmerge/output/<prefix>`
    pub fn default_output_dir(&self) -> Result<PathBuf> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::base_dir()?.join("output").join(&self.file_prefix)),
        }
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        let dirs = [Self::base_dir()?, Self::logs_dir()?];
        for dir in &dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from disk, or creates default if missing.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        Self::load_from_path(&path)
    }

    /// Load config from a specific file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content).map_err(|e| {
                MergeError::Config(format!("{} is not valid JSON: {e}", path.display()))
            })?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to_path(&path)
    }

    /// Change one setting by its key, as used by `mailmerge config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), MergeError> {
        let parse_bool = |v: &str| match v.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(MergeError::Config(format!("'{v}' is not a boolean for {key}"))),
        };
        match key {
            "language" => self.language = value.parse()?,
            "file_prefix" => self.file_prefix = value.trim().to_string(),
            "output_dir" => {
                self.output_dir = Some(value.trim())
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from)
            }
            "zip_output" => self.zip_output = parse_bool(value)?,
            "strict" => self.strict = parse_bool(value)?,
            "clean_empty" => self.clean_empty = parse_bool(value)?,
            "log_level" => {
                crate::logging::filter_for(value)?;
                self.log_level = value.trim().to_ascii_lowercase();
            }
            "log_dir" => {
                self.log_dir = Some(value.trim())
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from)
            }
            other => return Err(MergeError::Config(format!("unknown setting '{other}'"))),
        }
        Ok(())
    }

    /// Save config to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}
