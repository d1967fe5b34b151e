use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок шины.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных
/// - 9xxx: Ошибки шины сообщений (маршрутизация, middleware, доставка)
///
/// `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`,
/// опционально `strum` добавляет `AsRefStr`/`EnumIter` (feature = "strum").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidValue = 2004,

    // === 9xxx: Шина сообщений ===
    InvalidPattern = 9000,
    InvalidTopic = 9001,
    MiddlewareFailed = 9002,
    DeliveryFailed = 9003,
    Unroutable = 9004,
    Timeout = 9005,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызвана некорректными аргументами вызывающей стороны
    /// (шаблон, имя топика, дубликат id).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgs
                | Self::InvalidValue
                | Self::AlreadyExists
                | Self::InvalidPattern
                | Self::InvalidTopic
        )
    }

    /// Ошибка относится к маршрутизации и доставке сообщений (диапазон 9xxx).
    pub fn is_bus_error(&self) -> bool {
        (9000..=9999).contains(&self.code())
    }

    /// Повтор операции имеет смысл. Шина сама ничего не повторяет, решение
    /// остаётся за издателем или подписчиком.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unroutable | Self::DeliveryFailed)
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::Unexpected)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::Unroutable => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidValue
            | Self::InvalidPattern
            | Self::InvalidTopic
            | Self::AlreadyExists => LogLevel::Info,
            Self::Internal | Self::Unexpected => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что ошибки вызывающей стороны и ошибки шины
    /// различаются.
    #[test]
    fn test_caller_vs_bus() {
        assert!(StatusCode::InvalidPattern.is_caller_error());
        assert!(StatusCode::InvalidPattern.is_bus_error());
        assert!(!StatusCode::MiddlewareFailed.is_caller_error());
        assert!(StatusCode::MiddlewareFailed.is_bus_error());
        assert!(!StatusCode::NotFound.is_bus_error());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>` и `from_u32`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::Unroutable.code();
        assert_eq!(StatusCode::try_from(n).unwrap(), StatusCode::Unroutable);
        assert!(StatusCode::from_u32(99999).is_none());
    }

    #[test]
    fn test_code_and_into() {
        let c = StatusCode::InvalidPattern;
        assert_eq!(c.code(), 9000);
        let n: u32 = c.into();
        assert_eq!(n, 9000);
        assert!(StatusCode::is_success(StatusCode::Success.code()));
        assert!(!StatusCode::is_success(StatusCode::NotFound.code()));
    }

    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(!StatusCode::InvalidPattern.is_retryable());
    }

    /// Тест проверяет уровни логирования для разных кодов.
    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::Unroutable.log_level(), LogLevel::Debug);
        assert_eq!(StatusCode::InvalidPattern.log_level(), LogLevel::Info);
        assert_eq!(StatusCode::MiddlewareFailed.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::Internal.log_level(), LogLevel::Error);
    }

    /// Тест проверяет формат `Display`: имя варианта и числовой код.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::InvalidPattern);
        assert!(s.contains("9000"), "Display must contain code, got: {s}");
        assert!(s.contains("InvalidPattern"), "got: {s}");
    }
}
