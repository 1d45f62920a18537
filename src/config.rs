//! Server Configuration
//!
//! The two parameters clients can read back through `CONFIG GET`:
//!
//! - `appendonly`: `yes` or `no`, validated at construction
//! - `save`: space-separated `<seconds> <changes>` pairs driving the
//!   snapshotter; an empty string selects the defaults
//!
//! Values are kept verbatim for `CONFIG GET`; `save` is additionally
//! parsed into [`SaveRule`]s for the snapshotter tickers.

use std::time::Duration;
use thiserror::Error;

/// The default snapshot rules: after 1 hour if ≥1 change, after 5 minutes
/// if ≥100 changes, after 1 minute if ≥10000 changes.
pub const DEFAULT_SAVE: &str = "3600 1 300 100 60 10000";

/// Errors raised while validating configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid appendonly option '{0}'. Only 'yes' or 'no' allowed.")]
    InvalidAppendOnly(String),

    #[error("at least 1 pair must be defined.")]
    NoSavePairs,

    #[error("save configuration must be set in pairs (<seconds> <changes>). Found {0} elements.")]
    UnpairedSave(usize),

    #[error("could not parse '{0}' to integer")]
    InvalidSaveNumber(String),
}

/// One snapshotter trigger: save every `every` if the modification counter
/// reached `changes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    pub every: Duration,
    pub changes: u64,
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    appendonly: String,
    save: String,
    save_rules: Vec<SaveRule>,
}

impl ServerConfig {
    /// Builds a configuration, validating `appendonly` and parsing `save`.
    /// An empty `save` string maps to [`DEFAULT_SAVE`]'s rules while the
    /// raw value stays empty for `CONFIG GET`.
    pub fn new(appendonly: &str, save: &str) -> Result<Self, ConfigError> {
        if !matches!(appendonly.to_lowercase().as_str(), "yes" | "no") {
            return Err(ConfigError::InvalidAppendOnly(appendonly.to_string()));
        }

        let save_rules = parse_save(if save.is_empty() { DEFAULT_SAVE } else { save })?;

        Ok(ServerConfig {
            appendonly: appendonly.to_string(),
            save: save.to_string(),
            save_rules,
        })
    }

    /// The raw value for a `CONFIG GET` parameter, if the name is known.
    /// Names are case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name.to_lowercase().as_str() {
            "appendonly" => Some(&self.appendonly),
            "save" => Some(&self.save),
            _ => None,
        }
    }

    /// The parsed snapshotter rules.
    pub fn save_rules(&self) -> &[SaveRule] {
        &self.save_rules
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        // Both values are statically valid
        ServerConfig::new("no", DEFAULT_SAVE).unwrap()
    }
}

fn parse_save(save: &str) -> Result<Vec<SaveRule>, ConfigError> {
    let parts: Vec<&str> = save.split(' ').collect();
    if parts.len() < 2 {
        return Err(ConfigError::NoSavePairs);
    }
    if parts.len() % 2 != 0 {
        return Err(ConfigError::UnpairedSave(parts.len()));
    }

    let mut numbers = Vec::with_capacity(parts.len());
    for part in parts {
        let number: u64 = part
            .parse()
            .map_err(|_| ConfigError::InvalidSaveNumber(part.to_string()))?;
        numbers.push(number);
    }

    Ok(numbers
        .chunks(2)
        .map(|pair| SaveRule {
            every: Duration::from_secs(pair[0]),
            changes: pair[1],
        })
        .collect())
}
