use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{error::SettingsError, logging::LoggingConfig, pubsub::is_wildcard, BusOptions};

/// Настройки шины.
///
/// Источники по возрастанию приоритета: значения по умолчанию,
/// необязательный TOML-файл, переменные окружения `TOPICBUS_*`
/// (вложенные поля через `__`, например `TOPICBUS_LOGGING__LEVEL`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub default_channel: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_channel: BusOptions::default().default_channel,
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Загружает только из окружения.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(None)
    }

    /// Загружает настройки, `file` при наличии накладывается поверх
    /// значений по умолчанию.
    pub fn load_from(file: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("default_channel", BusOptions::default().default_channel)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let cfg = builder
            // Переменные окружения с префиксом TOPICBUS_
            .add_source(
                Environment::with_prefix("TOPICBUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.default_channel.trim().is_empty() {
            return Err(SettingsError::Invalid {
                field: "default_channel",
                reason: "must not be empty".to_string(),
            });
        }
        if is_wildcard(&self.default_channel) {
            return Err(SettingsError::Invalid {
                field: "default_channel",
                reason: format!("wildcards are not allowed: '{}'", self.default_channel),
            });
        }
        Ok(())
    }

    pub fn bus_options(&self) -> BusOptions {
        BusOptions {
            default_channel: self.default_channel.clone(),
        }
    }
}
