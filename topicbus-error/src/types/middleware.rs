use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки конвейера middleware.
///
/// Ошибка трансформации локализована в конкретном вызове `transform` и не
/// ломает конвейер для последующих значений.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareError {
    /// Функция трансформации вернула ошибку
    TransformFailed { id: String, reason: String },
    /// Функция трансформации запаниковала
    TransformPanicked { id: String },
    /// Активная запись с таким id уже существует
    DuplicateId { id: String },
}

impl MiddlewareError {
    /// Id записи, к которой относится ошибка.
    pub fn id(&self) -> &str {
        match self {
            Self::TransformFailed { id, .. }
            | Self::TransformPanicked { id }
            | Self::DuplicateId { id } => id,
        }
    }
}

impl std::fmt::Display for MiddlewareError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::TransformFailed { id, reason } => {
                write!(f, "Middleware '{id}' failed: {reason}")
            }
            Self::TransformPanicked { id } => write!(f, "Middleware '{id}' panicked"),
            Self::DuplicateId { id } => write!(f, "Middleware '{id}' is already registered"),
        }
    }
}

impl std::error::Error for MiddlewareError {}

impl ErrorExt for MiddlewareError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TransformFailed { .. } | Self::TransformPanicked { .. } => {
                StatusCode::MiddlewareFailed
            }
            Self::DuplicateId { .. } => StatusCode::AlreadyExists,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", "bus_middleware".to_string()),
            ("status_code", self.status_code().to_string()),
            ("middleware", self.id().to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_middleware_error() {
        let err = MiddlewareError::TransformFailed {
            id: "suffix".to_string(),
            reason: "bad input".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::MiddlewareFailed);
        assert_eq!(err.id(), "suffix");
        assert_eq!(err.to_string(), "Middleware 'suffix' failed: bad input");
    }

    #[test]
    fn test_duplicate_id() {
        let err = MiddlewareError::DuplicateId {
            id: "auth".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::AlreadyExists);
        assert!(err
            .metrics_tags()
            .iter()
            .any(|(k, v)| *k == "middleware" && v == "auth"));
    }
}
