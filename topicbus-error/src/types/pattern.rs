use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки конфигурации: некорректный шаблон или имя топика.
///
/// Возвращаются синхронно при компиляции шаблона и фатальны только для
/// конкретного вызова.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// Пустой шаблон
    EmptyPattern,
    /// Пустой сегмент (`a..b`, `.a`, `a.`)
    EmptySegment { pattern: String, index: usize },
    /// Подстановочный символ внутри литерального сегмента (`a*`, `#b`)
    MalformedWildcard { pattern: String, segment: String },
    /// Движок регулярных выражений отверг скомпилированный шаблон
    Compile { pattern: String, reason: String },
    /// Шаблон там, где нужно точное имя топика
    WildcardName { name: String },
}

impl std::fmt::Display for PatternError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::EmptyPattern => write!(f, "Topic pattern is empty"),
            Self::EmptySegment { pattern, index } => {
                write!(f, "Topic pattern '{pattern}' has an empty segment at {index}")
            }
            Self::MalformedWildcard { pattern, segment } => write!(
                f,
                "Topic pattern '{pattern}': wildcard must fill a whole segment, got '{segment}'"
            ),
            Self::Compile { pattern, reason } => {
                write!(f, "Topic pattern '{pattern}' failed to compile: {reason}")
            }
            Self::WildcardName { name } => {
                write!(f, "Topic name '{name}' must not contain wildcard segments")
            }
        }
    }
}

impl std::error::Error for PatternError {}

impl ErrorExt for PatternError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Compile { .. } => StatusCode::Internal,
            _ => StatusCode::InvalidPattern,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Compile { .. } => "Invalid subscription pattern".to_string(),
            _ => self.to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus_pattern".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::EmptySegment { pattern, .. }
            | Self::MalformedWildcard { pattern, .. }
            | Self::Compile { pattern, .. } => {
                tags.push(("pattern", pattern.clone()));
            }
            Self::WildcardName { name } => tags.push(("topic", name.clone())),
            Self::EmptyPattern => {}
        }

        tags
    }
}

/// Конвертация из regex::Error
#[cfg(feature = "regex")]
impl From<regex::Error> for PatternError {
    fn from(err: regex::Error) -> Self {
        PatternError::Compile {
            pattern: String::new(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_error_status() {
        assert_eq!(
            PatternError::EmptyPattern.status_code(),
            StatusCode::InvalidPattern
        );
        let err = PatternError::Compile {
            pattern: "x".to_string(),
            reason: "bad".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::Internal);
        assert_eq!(err.client_message(), "Invalid subscription pattern");
    }

    #[test]
    fn test_pattern_error_tags() {
        let err = PatternError::MalformedWildcard {
            pattern: "a.b*".to_string(),
            segment: "b*".to_string(),
        };
        let tags = err.metrics_tags();
        assert!(tags.iter().any(|(k, v)| *k == "pattern" && v == "a.b*"));
        assert!(err.to_string().contains("'b*'"));
    }
}
