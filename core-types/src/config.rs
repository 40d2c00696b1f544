use std::{path::Path, time::Duration};

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    document::DEFAULT_ID_FIELD,
    range::{validate_range, RangeError, MAX_RANGE},
};

const CONFIG_FILE: &str = "window";
const ENV_PREFIX: &str = "WINDOW";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid window range: {0}")]
    Range(#[from] RangeError),
    #[error("window must span at least one document")]
    EmptyWindow,
    #[error("identity field must not be empty")]
    EmptyIdField,
    #[error("buffer factor {factor} is too large")]
    BufferFactorTooLarge { factor: usize },
    #[error("event capacity must be positive")]
    ZeroEventCapacity,
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
}

/// Window engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_to")]
    pub to: usize,
    /// Extra documents kept on each side of the window, as a multiple of its size.
    #[serde(default = "default_buffer_factor")]
    pub buffer_factor: usize,
    #[serde(default = "default_backfill_debounce_ms")]
    pub backfill_debounce_ms: u64,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Start on the first subscription and stop when the last one is dropped.
    #[serde(default)]
    pub connect_on_subscribe: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_label() -> String {
    "window".to_string()
}

fn default_to() -> usize {
    50
}

fn default_buffer_factor() -> usize {
    3
}

fn default_backfill_debounce_ms() -> u64 {
    100
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_event_capacity() -> usize {
    256
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            from: 0,
            to: default_to(),
            buffer_factor: default_buffer_factor(),
            backfill_debounce_ms: default_backfill_debounce_ms(),
            id_field: default_id_field(),
            connect_on_subscribe: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl WindowConfig {
    /// Defaults with backfills firing on the next scheduler turn.
    pub fn non_interactive() -> Self {
        Self {
            backfill_debounce_ms: 0,
            ..Self::default()
        }
    }

    /// Reads `window.toml` (optional) and `WINDOW_*` environment overrides.
    pub fn load() -> Result<Self, ConfigurationError> {
        let settings = Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let settings = Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_range(mut self, from: usize, to: usize) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_buffer_factor(mut self, factor: usize) -> Self {
        self.buffer_factor = factor;
        self
    }

    pub fn with_backfill_debounce(mut self, debounce: Duration) -> Self {
        self.backfill_debounce_ms = debounce.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_connect_on_subscribe(mut self, enabled: bool) -> Self {
        self.connect_on_subscribe = enabled;
        self
    }

    pub fn backfill_debounce(&self) -> Duration {
        Duration::from_millis(self.backfill_debounce_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_range(self.from, self.to)?;
        if self.to == self.from {
            return Err(ConfigurationError::EmptyWindow);
        }
        if self.id_field.trim().is_empty() {
            return Err(ConfigurationError::EmptyIdField);
        }
        if self.event_capacity == 0 {
            return Err(ConfigurationError::ZeroEventCapacity);
        }
        // Largest buffer any window can grow: two margins plus the window.
        let largest_buffer = MAX_RANGE
            .checked_mul(self.buffer_factor)
            .and_then(|margin| margin.checked_mul(2))
            .and_then(|margins| margins.checked_add(MAX_RANGE));
        if largest_buffer.is_none() {
            return Err(ConfigurationError::BufferFactorTooLarge {
                factor: self.buffer_factor,
            });
        }
        Ok(())
    }
}
