use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки, рассылаемые подписчикам топика.
///
/// Доставляются в `on_error` каждого текущего подписчика и не отписывают
/// его: следующие значения и ошибки продолжают приходить.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Издатель явно опубликовал ошибку в топик
    Published { topic: String, reason: String },
    /// Отвечающая сторона отклонила запрос
    Rejected { reason: String },
}

impl std::fmt::Display for DeliveryError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Published { topic, reason } => write!(f, "Error on topic {topic}: {reason}"),
            Self::Rejected { reason } => write!(f, "Request rejected: {reason}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl ErrorExt for DeliveryError {
    fn status_code(&self) -> StatusCode {
        StatusCode::DeliveryFailed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus_delivery".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Published { topic, .. } = self {
            tags.push(("topic", topic.clone()));
        }
        tags
    }
}
