use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;
use topicbus_error::StackError;
use tracing::trace;

use super::{observers::ObserverList, Item, Observable, Observer, Subscriber, Subscription};

/// Мультикаст-поток, который никогда не завершается.
///
/// Отличия от обычного subject'а:
/// - `complete()` ничего не делает, подписчики остаются подключены;
/// - `error()` запоминает ошибку и рассылает её всем текущим подписчикам,
///   но не отключает их: последующие `next`/`error` продолжают приходить.
///
/// Вариант с replay ([`EndlessSubject::with_replay`]) хранит отправленные
/// значения и отдаёт их каждому новому подписчику до живых значений.
pub struct EndlessSubject<T> {
    inner: Arc<EndlessInner<T>>,
}

struct EndlessInner<T> {
    observers: Arc<ObserverList<T>>,
    thrown: Mutex<Option<StackError>>,
    replay: Option<ReplayBuffer<T>>,
}

struct ReplayBuffer<T> {
    /// `None` - без ограничения
    capacity: Option<usize>,
    values: Mutex<VecDeque<T>>,
}

impl<T: Item> EndlessSubject<T> {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Replay-вариант: новые подписчики сначала получают сохранённые
    /// значения. При заданной `capacity` хранятся только последние значения.
    pub fn with_replay(capacity: Option<usize>) -> Self {
        Self::build(Some(ReplayBuffer {
            capacity,
            values: Mutex::new(VecDeque::new()),
        }))
    }

    fn build(replay: Option<ReplayBuffer<T>>) -> Self {
        Self {
            inner: Arc::new(EndlessInner {
                observers: ObserverList::new(),
                thrown: Mutex::new(None),
                replay,
            }),
        }
    }

    pub fn is_replaying(&self) -> bool {
        self.inner.replay.is_some()
    }

    /// Последняя разосланная ошибка.
    pub fn last_error(&self) -> Option<StackError> {
        self.inner.thrown.lock().clone()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Количество значений в replay-буфере.
    pub fn buffered(&self) -> usize {
        self.inner
            .replay
            .as_ref()
            .map_or(0, |r| r.values.lock().len())
    }
}

impl<T: Item> Default for EndlessSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EndlessSubject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for EndlessSubject<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("EndlessSubject")
            .field("replay", &self.inner.replay.is_some())
            .finish()
    }
}

impl<T> ReplayBuffer<T> {
    fn push(
        &self,
        value: T,
    ) {
        let mut values = self.values.lock();
        values.push_back(value);
        if let Some(cap) = self.capacity {
            while values.len() > cap {
                values.pop_front();
            }
        }
    }
}

impl<T: Item> Observer<T> for EndlessSubject<T> {
    fn next(
        &self,
        value: T,
    ) {
        let _gate = self.inner.observers.gate();
        if let Some(replay) = &self.inner.replay {
            replay.push(value.clone());
        }
        for subscriber in self.inner.observers.snapshot() {
            subscriber.emit_next(value.clone());
        }
    }

    fn error(
        &self,
        err: StackError,
    ) {
        let _gate = self.inner.observers.gate();
        *self.inner.thrown.lock() = Some(err.clone());
        for subscriber in self.inner.observers.snapshot() {
            subscriber.emit_error(err.clone());
        }
    }

    fn complete(&self) {
        trace!("Completion ignored by endless subject");
    }
}

impl<T: Item> Observable<T> for EndlessSubject<T> {
    fn subscribe(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        let Some(replay) = &self.inner.replay else {
            return self.inner.observers.add(subscriber);
        };
        // Под gate: между replay и живыми значениями ничего не вклинится.
        let _gate = self.inner.observers.gate();
        let replayed: Vec<T> = replay.values.lock().iter().cloned().collect();
        let subscription = self.inner.observers.add(subscriber.clone());
        for value in replayed {
            if subscription.is_closed() {
                break;
            }
            subscriber.emit_next(value);
        }
        subscription
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use topicbus_error::{DeliveryError, GenericError, StatusCode};

    use super::*;

    fn collect<T: Item>(subject: &EndlessSubject<T>) -> (Arc<Mutex<Vec<T>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = subject.subscribe(Subscriber::new(move |v| s.lock().push(v)));
        (seen, sub)
    }

    fn err(reason: &str) -> StackError {
        StackError::new(DeliveryError::Published {
            topic: "t".to_string(),
            reason: reason.to_string(),
        })
    }

    /// complete() не отключает подписчиков и не доходит до них.
    #[test]
    fn test_complete_is_noop() {
        let subject = EndlessSubject::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (completed.clone(), seen.clone());
        subject.subscribe(Subscriber::new(move |v: i32| s.lock().push(v)).on_complete(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        subject.next(1);
        subject.complete();
        subject.complete();
        subject.next(2);

        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert_eq!(subject.observer_count(), 1);
    }

    /// Три ошибки подряд, потом значение: подписчик получает всё.
    #[test]
    fn test_errors_do_not_detach() {
        let subject = EndlessSubject::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (e, s) = (errors.clone(), seen.clone());
        subject.subscribe(
            Subscriber::new(move |v: &'static str| s.lock().push(v))
                .on_error(move |err| e.lock().push(err.to_string())),
        );

        subject.error(err("first"));
        subject.error(err("second"));
        subject.error(err("third"));
        subject.next("after");

        assert_eq!(errors.lock().len(), 3);
        assert!(errors.lock()[2].contains("third"));
        assert_eq!(*seen.lock(), vec!["after"]);
        assert!(subject.last_error().is_some());
    }

    #[test]
    fn test_plain_subject_does_not_replay() {
        let subject = EndlessSubject::new();
        subject.next(1);
        let (seen, _sub) = collect(&subject);
        subject.next(2);
        assert_eq!(*seen.lock(), vec![2]);
        assert_eq!(subject.buffered(), 0);
    }

    #[test]
    fn test_replay_to_late_subscriber() {
        let subject = EndlessSubject::with_replay(None);
        subject.next("a");
        subject.next("b");

        let (seen, _sub) = collect(&subject);
        subject.next("c");

        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
        assert!(subject.is_replaying());
    }

    #[test]
    fn test_replay_capacity() {
        let subject = EndlessSubject::with_replay(Some(2));
        for v in 1..=5 {
            subject.next(v);
        }
        let (seen, _sub) = collect(&subject);
        assert_eq!(*seen.lock(), vec![4, 5]);
    }

    /// Отписка останавливает доставку только этому подписчику.
    #[test]
    fn test_unsubscribe_one() {
        let subject = EndlessSubject::new();
        let (a, sub_a) = collect(&subject);
        let (b, _sub_b) = collect(&subject);

        subject.next(1);
        sub_a.unsubscribe();
        subject.next(2);

        assert_eq!(*a.lock(), vec![1]);
        assert_eq!(*b.lock(), vec![1, 2]);
    }

    /// Колбэк может синхронно публиковать в тот же subject.
    #[test]
    fn test_reentrant_next() {
        let subject = EndlessSubject::new();
        let inner = subject.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        subject.subscribe(Subscriber::new(move |v: i32| {
            s.lock().push(v);
            if v < 3 {
                inner.next(v + 1);
            }
        }));

        subject.next(1);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_error_without_handler() {
        let subject = EndlessSubject::new();
        let (seen, _sub) = collect(&subject);
        subject.error(StackError::new(GenericError::new(StatusCode::Unexpected, "x")));
        subject.next(10);
        assert_eq!(*seen.lock(), vec![10]);
    }
}
