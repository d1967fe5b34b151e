use std::{fmt, sync::Arc};

use parking_lot::{Mutex, ReentrantMutex};
use topicbus_error::{MiddlewareError, StackError};
use tracing::warn;

use super::MiddlewarePipeline;
use crate::stream::{Item, Observable, Observer, Subject, Subscriber, Subscription};

/// Как значение проходит через конвейер: для обычного subject'а целиком,
/// для топика только полезная нагрузка конверта.
pub type ApplyFn<V, P> = fn(&MiddlewarePipeline<P>, V) -> Result<V, StackError>;

/// Состояние применения middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    ApplyingMiddleware,
    /// Во время применения пришёл `complete()`, он будет выполнен после
    /// доставки значения.
    ApplyingMiddlewareCompletePending,
}

#[derive(Debug, Default)]
struct Flags {
    /// Глубина вложенных применений (реентерабельная публикация)
    applying: usize,
    complete_pending: bool,
}

/// Subject, пропускающий каждое значение через [`MiddlewarePipeline`]
/// перед доставкой во внутренний subject.
///
/// Значения одного экземпляра обрабатываются строго по порядку вызовов.
/// `complete()`, пришедший во время применения middleware, откладывается
/// до доставки текущего значения.
pub struct MiddlewareSubject<V, S, P = V> {
    inner: S,
    pipeline: MiddlewarePipeline<P>,
    apply: ApplyFn<V, P>,
    flags: Arc<Mutex<Flags>>,
    gate: Arc<ReentrantMutex<()>>,
    /// Пересылать ошибку middleware во внутренний subject
    forward_errors: bool,
}

impl<T: Item, S: Subject<T>> MiddlewareSubject<T, S> {
    pub fn new(
        inner: S,
        pipeline: MiddlewarePipeline<T>,
    ) -> Self {
        Self::with_apply(inner, pipeline, |pipeline, value| pipeline.apply(value))
    }
}

impl<V: Item, S: Subject<V>, P: Item> MiddlewareSubject<V, S, P> {
    pub fn with_apply(
        inner: S,
        pipeline: MiddlewarePipeline<P>,
        apply: ApplyFn<V, P>,
    ) -> Self {
        Self {
            inner,
            pipeline,
            apply,
            flags: Arc::new(Mutex::new(Flags::default())),
            gate: Arc::new(ReentrantMutex::new(())),
            forward_errors: false,
        }
    }

    /// Ошибки middleware уходят подписчикам через `error()` внутреннего
    /// subject'а, а не только возвращаются издателю.
    pub fn forward_errors(
        mut self,
        forward: bool,
    ) -> Self {
        self.forward_errors = forward;
        self
    }

    pub fn middleware(&self) -> &MiddlewarePipeline<P> {
        &self.pipeline
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn state(&self) -> ApplyState {
        let flags = self.flags.lock();
        match (flags.applying, flags.complete_pending) {
            (0, _) => ApplyState::Idle,
            (_, false) => ApplyState::ApplyingMiddleware,
            (_, true) => ApplyState::ApplyingMiddlewareCompletePending,
        }
    }

    /// Применяет middleware и доставляет результат.
    ///
    /// При ошибке значение не доставляется, ошибка возвращается издателю
    /// (и пересылается подписчикам, если включён `forward_errors`).
    /// Отложенный `complete()` выполняется в любом случае.
    pub fn try_next(
        &self,
        value: V,
    ) -> Result<(), StackError> {
        let _gate = self.gate.lock();
        self.flags.lock().applying += 1;

        let result = (self.apply)(&self.pipeline, value);

        let complete_now = {
            let mut flags = self.flags.lock();
            flags.applying -= 1;
            flags.applying == 0 && std::mem::take(&mut flags.complete_pending)
        };

        let outcome = match result {
            Ok(v) => {
                self.inner.next(v);
                Ok(())
            }
            Err(err) => {
                if self.forward_errors {
                    self.inner.error(err.clone());
                }
                Err(err)
            }
        };

        if complete_now {
            self.inner.complete();
        }
        outcome
    }
}

impl<V, S: Clone, P> Clone for MiddlewareSubject<V, S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            pipeline: self.pipeline.clone(),
            apply: self.apply,
            flags: self.flags.clone(),
            gate: self.gate.clone(),
            forward_errors: self.forward_errors,
        }
    }
}

impl<V, S, P> fmt::Debug for MiddlewareSubject<V, S, P> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MiddlewareSubject")
            .field("flags", &*self.flags.lock())
            .field("forward_errors", &self.forward_errors)
            .finish()
    }
}

impl<V: Item, S: Subject<V>, P: Item> Observer<V> for MiddlewareSubject<V, S, P> {
    fn next(
        &self,
        value: V,
    ) {
        if let Err(err) = self.try_next(value) {
            let middleware = err
                .downcast_ref::<MiddlewareError>()
                .map(|e| e.id().to_string());
            warn!(middleware = ?middleware, error = %err, "Value dropped by middleware");
        }
    }

    fn error(
        &self,
        err: StackError,
    ) {
        self.inner.error(err)
    }

    fn complete(&self) {
        {
            let mut flags = self.flags.lock();
            if flags.applying > 0 {
                flags.complete_pending = true;
                return;
            }
        }
        self.inner.complete()
    }
}

impl<V: Item, S: Subject<V>, P: Item> Observable<V> for MiddlewareSubject<V, S, P> {
    fn subscribe(
        &self,
        subscriber: Subscriber<V>,
    ) -> Subscription {
        self.inner.subscribe(subscriber)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        OnceLock,
    };

    use topicbus_error::{GenericError, StatusCode};

    use super::*;
    use crate::stream::{AsyncSubject, EndlessSubject, PlainSubject};

    fn record<S: Subject<i32>>(subject: &S) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (n, e, c) = (log.clone(), log.clone(), log.clone());
        subject.subscribe(
            Subscriber::new(move |v: i32| n.lock().push(format!("next:{v}")))
                .on_error(move |err| {
                    e.lock().push(format!("error:{}", err.status_code().code()))
                })
                .on_complete(move || c.lock().push("complete".to_string())),
        );
        log
    }

    #[test]
    fn test_values_pass_through_pipeline() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(|v: i32| Ok(v * 2));
        let subject = MiddlewareSubject::new(EndlessSubject::new(), pipeline);
        let log = record(&subject);

        subject.next(1);
        subject.next(5);

        assert_eq!(*log.lock(), vec!["next:2", "next:10"]);
        assert_eq!(subject.state(), ApplyState::Idle);
    }

    /// complete() во время применения откладывается до доставки значения.
    #[test]
    fn test_complete_deferred_until_value_delivered() {
        let subject_cell: Arc<OnceLock<MiddlewareSubject<i32, AsyncSubject<i32>>>> =
            Arc::new(OnceLock::new());
        let states = Arc::new(Mutex::new(Vec::new()));

        let pipeline = MiddlewarePipeline::new();
        let (cell, st) = (subject_cell.clone(), states.clone());
        pipeline.add(move |v: i32| {
            if let Some(subject) = cell.get() {
                subject.complete();
                st.lock().push(subject.state());
            }
            Ok(v + 1)
        });

        let subject = MiddlewareSubject::new(AsyncSubject::new(), pipeline);
        let _ = subject_cell.set(subject.clone());
        let log = record(&subject);

        subject.next(41);

        assert_eq!(
            *states.lock(),
            vec![ApplyState::ApplyingMiddlewareCompletePending]
        );
        assert_eq!(*log.lock(), vec!["next:42", "complete"]);
        assert_eq!(subject.state(), ApplyState::Idle);
    }

    #[test]
    fn test_error_returned_to_publisher() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(|_: i32| {
            Err(StackError::new(GenericError::new(StatusCode::InvalidValue, "no")))
        });
        let subject = MiddlewareSubject::new(EndlessSubject::new(), pipeline);
        let log = record(&subject);

        let err = subject.try_next(1).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::MiddlewareFailed);
        // подписчики ничего не получили
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_forward_errors() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(|_: i32| {
            Err(StackError::new(GenericError::new(StatusCode::InvalidValue, "no")))
        });
        let subject = MiddlewareSubject::new(PlainSubject::new(), pipeline).forward_errors(true);
        let log = record(&subject);

        subject.next(1);
        assert_eq!(*log.lock(), vec!["error:9002"]);
    }

    /// Конвейер можно менять между значениями.
    #[test]
    fn test_pipeline_changes_apply_to_next_values() {
        let subject = MiddlewareSubject::new(EndlessSubject::new(), MiddlewarePipeline::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        subject.subscribe(Subscriber::new(move |_: i32| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let log = record(&subject);

        subject.next(1);
        let id = subject.middleware().add(|v: i32| Ok(v + 100));
        subject.next(1);
        subject.middleware().remove(id.as_str());
        subject.next(1);

        assert_eq!(*log.lock(), vec!["next:1", "next:101", "next:1"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
