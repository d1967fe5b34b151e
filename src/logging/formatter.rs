use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{ConsoleConfig, LogFormat};

/// Слой `fmt` в заданном формате. Возвращаем boxed trait-объект, чтобы
/// стереть конкретный тип формата (json/pretty/compact).
pub fn build_formatter<S, W>(
    options: &ConsoleConfig,
    format: LogFormat,
    with_ansi: bool,
    writer: W,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => Box::new(
            fmt::layer()
                .event_format(fmt::format().json().with_current_span(true))
                .fmt_fields(fmt::format::JsonFields::new())
                .with_writer(writer)
                .with_ansi(false)
                .with_target(options.with_target)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers),
        ),
        LogFormat::Pretty => Box::new(
            fmt::layer()
                .event_format(fmt::format().pretty())
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(options.with_target)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers),
        ),
        LogFormat::Compact => Box::new(
            fmt::layer()
                .event_format(fmt::format().compact())
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(options.with_target)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers),
        ),
    }
}
