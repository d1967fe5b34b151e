use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки request/reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Запрос адресован шаблону, а не точному имени топика
    WildcardTopic { pattern: String },
    /// Топик не существует (только для строгого варианта запроса)
    Unroutable { topic: String },
    /// Ответ не пришёл за отведённое время
    Timeout { topic: String, millis: u64 },
}

impl std::fmt::Display for RequestError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::WildcardTopic { pattern } => {
                write!(f, "Request requires an exact topic name, got pattern '{pattern}'")
            }
            Self::Unroutable { topic } => write!(f, "No responder topic '{topic}'"),
            Self::Timeout { topic, millis } => {
                write!(f, "Request to '{topic}' timed out after {millis} ms")
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl ErrorExt for RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::WildcardTopic { .. } => StatusCode::InvalidTopic,
            Self::Unroutable { .. } => StatusCode::Unroutable,
            Self::Timeout { .. } => StatusCode::Timeout,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus_request".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::WildcardTopic { pattern } => tags.push(("topic", pattern.clone())),
            Self::Unroutable { topic } | Self::Timeout { topic, .. } => {
                tags.push(("topic", topic.clone()))
            }
        }
        tags
    }
}
