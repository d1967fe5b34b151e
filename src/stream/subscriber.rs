use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use topicbus_error::StackError;
use tracing::debug;

use super::Observer;

type NextFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(StackError) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;

/// Набор колбэков одного потребителя потока.
///
/// `on_next` обязателен, `on_error` и `on_complete` подключаются
/// builder-методами. Ошибка без обработчика только логируется.
pub struct Subscriber<T> {
    on_next: NextFn<T>,
    on_error: Option<ErrorFn>,
    on_complete: Option<CompleteFn>,
}

/// Handle подписки.
///
/// Отписка только явная: `Drop` ничего не делает, подписка живёт столько же,
/// сколько источник. Клоны разделяют одно состояние, повторный
/// `unsubscribe` безопасен.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    closed: AtomicBool,
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T: 'static> Subscriber<T> {
    pub fn new<F>(on_next: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            on_next: Arc::new(on_next),
            on_error: None,
            on_complete: None,
        }
    }

    pub fn on_error<F>(
        mut self,
        f: F,
    ) -> Self
    where
        F: Fn(StackError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(
        mut self,
        f: F,
    ) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Перенаправляет все три сигнала в `observer`.
    pub fn forward_to<O>(observer: Arc<O>) -> Self
    where
        O: Observer<T> + ?Sized + 'static,
    {
        let on_next = observer.clone();
        let on_error = observer.clone();
        Self::new(move |v| on_next.next(v))
            .on_error(move |e| on_error.error(e))
            .on_complete(move || observer.complete())
    }

    /// Пропускает в `on_next` только значения, удовлетворяющие `predicate`.
    /// Ошибки и завершение проходят без изменений.
    pub fn filter<P>(
        self,
        predicate: P,
    ) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let downstream = self.on_next;
        Self {
            on_next: Arc::new(move |v| {
                if predicate(&v) {
                    downstream(v)
                }
            }),
            on_error: self.on_error,
            on_complete: self.on_complete,
        }
    }

    /// Подписчик на поток `U`, который преобразует значения в `T`.
    pub fn contramap<U, F>(
        self,
        f: F,
    ) -> Subscriber<U>
    where
        U: 'static,
        F: Fn(U) -> T + Send + Sync + 'static,
    {
        let downstream = self.on_next;
        Subscriber {
            on_next: Arc::new(move |v| downstream(f(v))),
            on_error: self.on_error,
            on_complete: self.on_complete,
        }
    }

    pub(crate) fn emit_next(
        &self,
        value: T,
    ) {
        (self.on_next)(value)
    }

    pub(crate) fn emit_error(
        &self,
        err: StackError,
    ) {
        match &self.on_error {
            Some(f) => f(err),
            None => debug!(error = %err, "Unhandled stream error"),
        }
    }

    pub(crate) fn emit_complete(&self) {
        if let Some(f) = &self.on_complete {
            f()
        }
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            on_next: self.on_next.clone(),
            on_error: self.on_error.clone(),
            on_complete: self.on_complete.clone(),
        }
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl Subscription {
    /// Подписка, которая при отписке вызовет `teardown` (ровно один раз).
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(SubscriptionInner {
                closed: AtomicBool::new(false),
                teardown: Mutex::new(Some(Box::new(teardown))),
            }),
        }
    }

    /// Уже закрытая подписка без teardown.
    pub fn closed() -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                closed: AtomicBool::new(true),
                teardown: Mutex::new(None),
            }),
        }
    }

    /// Отключает подписчика от источника. Идемпотентно.
    pub fn unsubscribe(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // teardown вызывается вне блокировки
        let teardown = self.inner.teardown.lock().take();
        if let Some(f) = teardown {
            f();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use topicbus_error::{GenericError, StatusCode};

    use super::*;

    /// Проверяет, что teardown вызывается ровно один раз.
    #[test]
    fn test_unsubscribe_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let clone = sub.clone();

        assert!(!sub.is_closed());
        sub.unsubscribe();
        clone.unsubscribe();
        sub.unsubscribe();

        assert!(sub.is_closed());
        assert!(clone.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_subscription() {
        let sub = Subscription::closed();
        assert!(sub.is_closed());
        sub.unsubscribe();
    }

    /// Проверяет, что filter пропускает только подходящие значения,
    /// а ошибки доходят до обработчика.
    #[test]
    fn test_filter_and_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let e = errors.clone();

        let sub = Subscriber::new(move |v: i32| s.lock().push(v))
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .filter(|v| v % 2 == 0);

        for v in 1..=6 {
            sub.emit_next(v);
        }
        sub.emit_error(StackError::new(GenericError::new(
            StatusCode::Unexpected,
            "boom",
        )));

        assert_eq!(*seen.lock(), vec![2, 4, 6]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_contramap() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub =
            Subscriber::new(move |v: String| s.lock().push(v)).contramap(|n: u8| n.to_string());
        sub.emit_next(7);
        assert_eq!(*seen.lock(), vec!["7".to_string()]);
    }

    /// Ошибка без обработчика не паникует.
    #[test]
    fn test_missing_handlers_are_silent() {
        let sub = Subscriber::new(|_: i32| {});
        sub.emit_error(StackError::new(GenericError::new(StatusCode::Unknown, "x")));
        sub.emit_complete();
    }
}
