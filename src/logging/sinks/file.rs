use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Guard нужно держать до завершения программы, иначе хвост буфера
/// потеряется.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let file_appender = daily(&config.log_dir, &config.file.filename);
    let (writer, guard) = non_blocking(file_appender);
    let layer = formatter::build_formatter(&config.console, config.file.format, false, writer);
    (layer, guard)
}
