use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для ошибок шины (object-safe).
///
/// Предоставляет вспомогательные методы для работы с ошибками:
/// - извлечение статус-кода,
/// - безопасное сообщение для подписчика,
/// - детализированное сообщение для логов,
/// - теги для систем наблюдаемости.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки. По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`], чтобы можно было выполнить downcast
    /// к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Сообщение, которое можно показать внешнему потребителю шины.
    ///
    /// Для внутренних ошибок детали скрываются.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal bus error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Детализированное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Набор тегов для метрик (ключ–значение).
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Короткое имя типа ошибки (без пути модулей).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, error::Error, fmt};

    use super::*;

    // Ошибка без переопределения status_code (default = Internal).
    #[derive(Debug)]
    struct DefaultError(pub &'static str);

    impl fmt::Display for DefaultError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "DefaultError: {}", self.0)
        }
    }

    impl Error for DefaultError {}

    impl ErrorExt for DefaultError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct UnroutableError(pub &'static str);

    impl fmt::Display for UnroutableError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "no topic {}", self.0)
        }
    }

    impl Error for UnroutableError {}

    impl ErrorExt for UnroutableError {
        fn status_code(&self) -> StatusCode {
            StatusCode::Unroutable
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что по умолчанию статус ошибки `Internal`.
    #[test]
    fn test_default_status_code_is_internal() {
        assert_eq!(DefaultError("oops").status_code(), StatusCode::Internal);
    }

    /// Тест проверяет, что внутренние детали не попадают в client_message.
    #[test]
    fn test_client_message_hides_internal() {
        let e = DefaultError("sensitive");
        assert_eq!(e.client_message(), "Internal bus error");
    }

    #[test]
    fn test_client_message_non_internal() {
        let e = UnroutableError("orders.created");
        assert_eq!(e.client_message(), e.to_string());
    }

    /// Тест проверяет downcast через `as_any`.
    #[test]
    fn test_as_any_downcast() {
        let e = UnroutableError("x");
        let down = e.as_any().downcast_ref::<UnroutableError>();
        assert_eq!(down.map(|d| d.0), Some("x"));
    }

    /// Тест проверяет, что теги содержат тип и код статуса.
    #[test]
    fn test_metrics_tags_contains_expected_pairs() {
        let e = UnroutableError("t");
        let tags = e.metrics_tags();
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "error_type" && v.ends_with("UnroutableError")));
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "status_code" && v == &StatusCode::Unroutable.to_string()));
    }
}
