//! Ошибки крейта.
//!
//! Таксономия ошибок шины (`StatusCode`, `StackError`, `PatternError` и
//! т.д.) живёт в крейте `topicbus-error` и переэкспортируется отсюда.
//! Локальные ошибки настройки окружения (конфигурация, логирование)
//! описаны через `thiserror`.

use thiserror::Error;
pub use topicbus_error::*;

/// Ошибка загрузки или проверки настроек.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Ошибка инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
    #[error("Invalid logging setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
    #[error("Logging I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Global subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_error_display() {
        let err = SettingsError::Invalid {
            field: "default_channel",
            reason: "must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid setting `default_channel`: must not be empty"
        );
    }

    #[test]
    fn test_logging_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LoggingError = io.into();
        assert!(matches!(err, LoggingError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
