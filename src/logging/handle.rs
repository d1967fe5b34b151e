use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing_appender::non_blocking::WorkerGuard;

/// Счётчики жизненного цикла логирования.
#[derive(Debug, Default)]
pub struct LoggingMetrics {
    flush_count: AtomicU64,
    shutdown_in_progress: AtomicBool,
}

/// Снимок [`LoggingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingStats {
    pub flush_count: u64,
    pub shutdown_in_progress: bool,
}

/// Handle для управления lifecycle логирования.
///
/// Держит guard неблокирующего файлового writer'а: пока handle жив,
/// буфер сбрасывается в фоне; при drop/shutdown сбрасывается остаток.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    metrics: Arc<LoggingMetrics>,
    /// Timeout для flush при shutdown (по умолчанию 5 секунд)
    flush_timeout: Duration,
}

impl LoggingMetrics {
    fn record_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    fn start_shutdown(&self) {
        self.shutdown_in_progress.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> LoggingStats {
        LoggingStats {
            flush_count: self.flush_count.load(Ordering::Relaxed),
            shutdown_in_progress: self.shutdown_in_progress.load(Ordering::Acquire),
        }
    }
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Отмечает запрос flush. Сам сброс делает фоновый поток writer'а.
    pub fn flush(&self) {
        self.metrics.record_flush();
        tracing::debug!(
            flush_count = self.metrics.stats().flush_count,
            "Logging flush requested"
        );
    }

    /// Graceful shutdown: сбрасывает буфер файлового writer'а.
    pub fn shutdown(mut self) {
        self.metrics.start_shutdown();
        tracing::info!(
            timeout_secs = self.flush_timeout.as_secs(),
            "Initiating logging shutdown"
        );

        let start = Instant::now();
        drop(self.file_guard.take());
        let elapsed = start.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }

    /// Shutdown из async-контекста: guard сбрасывается в блокирующем потоке.
    pub async fn shutdown_async(mut self) {
        self.metrics.start_shutdown();
        let guard = self.file_guard.take();
        let timeout = self.flush_timeout;

        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || drop(guard))).await
        {
            Ok(Ok(())) => tracing::debug!("Async logging shutdown completed"),
            Ok(Err(e)) => eprintln!("Logging shutdown task panicked: {e}"),
            Err(_) => eprintln!(
                "WARNING: Logging shutdown exceeded timeout of {}ms",
                timeout.as_millis()
            ),
        }
    }

    pub fn stats(&self) -> LoggingStats {
        self.metrics.stats()
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if self.file_guard.is_some() && !self.metrics.stats().shutdown_in_progress {
            eprintln!(
                "WARNING: LoggingHandle dropped without explicit shutdown(). \
                 Some logs may be lost."
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_is_counted() {
        let handle = LoggingHandle::new(None);
        handle.flush();
        handle.flush();
        assert_eq!(handle.stats().flush_count, 2);
        assert!(!handle.stats().shutdown_in_progress);
        assert!(!handle.has_file_sink());
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_async_with_guard() {
        let (_writer, guard) = tracing_appender::non_blocking(std::io::sink());
        let handle = LoggingHandle::new(Some(guard)).with_flush_timeout(Duration::from_secs(1));
        assert!(handle.has_file_sink());
        handle.shutdown_async().await;
    }
}
