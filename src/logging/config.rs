use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoggingError;

/// Допустимые уровни логирования.
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "compact" => Some(LogFormat::Compact),
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

/// Настройки файлового вывода (ежедневная ротация).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    /// Префикс имени файла, к нему добавляется дата
    pub filename: String,
    pub format: LogFormat,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "topicbus.log".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень
    pub level: String,
    /// Дополнительные директивы `EnvFilter` (`"topicbus::pubsub=trace"`)
    pub directives: Vec<String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Переопределения из окружения: `TOPICBUS_LOG` (уровень),
    /// `TOPICBUS_LOG_FORMAT` (формат консоли), `TOPICBUS_LOG_DIR`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TOPICBUS_LOG") {
            self.level = level;
        }
        if let Some(format) = std::env::var("TOPICBUS_LOG_FORMAT")
            .ok()
            .and_then(|f| LogFormat::parse(&f))
        {
            self.console.format = format;
        }
        if let Ok(dir) = std::env::var("TOPICBUS_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        let level = self.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(LoggingError::InvalidSetting {
                field: "level",
                reason: format!("unknown level '{}'", self.level),
            });
        }
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err(LoggingError::InvalidSetting {
                field: "file.filename",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива фильтра: уровень, затем дополнительные директивы.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = vec![self.level.to_ascii_lowercase()];
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = LoggingConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.build_filter_directive(), "info");
    }

    #[test]
    fn test_directive_includes_extra_targets() {
        let cfg = LoggingConfig {
            level: "WARN".to_string(),
            directives: vec!["topicbus::pubsub=trace".to_string()],
            ..Default::default()
        };
        assert_eq!(cfg.build_filter_directive(), "warn,topicbus::pubsub=trace");
    }

    #[test]
    fn test_unknown_level_rejected() {
        let cfg = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(LoggingError::InvalidSetting { field: "level", .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("TOPICBUS_LOG", "debug");
        std::env::set_var("TOPICBUS_LOG_FORMAT", "JSON");
        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();
        std::env::remove_var("TOPICBUS_LOG");
        std::env::remove_var("TOPICBUS_LOG_FORMAT");

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.console.format, LogFormat::Json);
    }

    #[test]
    fn test_ensure_log_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: tmp.path().join("nested"),
            file: FileConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.ensure_log_dir().unwrap();
        assert!(tmp.path().join("nested").is_dir());
    }
}
