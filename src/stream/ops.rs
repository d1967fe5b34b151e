use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use topicbus_error::BusResult;

use super::{Item, Observable, Subscriber, Subscription};

/// Поток, который никогда ничего не отдаёт: ни значений, ни ошибок,
/// ни завершения.
pub struct Never<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Never<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Never<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Never<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Never<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("Never")
    }
}

impl<T: 'static> Observable<T> for Never<T> {
    fn subscribe(
        &self,
        _subscriber: Subscriber<T>,
    ) -> Subscription {
        Subscription::closed()
    }
}

/// Оператор фильтрации: пропускает значения источника, для которых
/// предикат вернул `true`.
pub struct Filter<S, P> {
    source: S,
    predicate: Arc<P>,
}

impl<T, S, P> Observable<T> for Filter<S, P>
where
    T: 'static,
    S: Observable<T>,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn subscribe(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        let predicate = self.predicate.clone();
        self.source
            .subscribe(subscriber.filter(move |v| predicate(v)))
    }
}

/// Операторы поверх любого [`Observable`].
pub trait ObservableExt<T>: Observable<T> + Sized {
    fn filter<P>(
        self,
        predicate: P,
    ) -> Filter<Self, P>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Filter {
            source: self,
            predicate: Arc::new(predicate),
        }
    }
}

impl<T, O: Observable<T>> ObservableExt<T> for O {}

/// Мост в async: ждёт первое значение источника.
///
/// Результат:
/// - `Ok(Some(v))` - первое значение;
/// - `Err(e)` - ошибка раньше значения;
/// - `Ok(None)` - источник завершился пустым.
///
/// Если источник не отдаёт ничего (например [`Never`]), future не
/// разрешается никогда; таймаут навешивает вызывающая сторона через
/// `tokio::time::timeout`. Подписка снимается, когда future завершается
/// или уничтожается.
pub fn first_value<T, O>(source: &O) -> impl Future<Output = BusResult<Option<T>>> + Send
where
    T: Item,
    O: Observable<T> + ?Sized,
{
    let (tx, rx) = oneshot::channel::<BusResult<Option<T>>>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let (on_error, on_complete) = (tx.clone(), tx.clone());

    let subscription = source.subscribe(
        Subscriber::new(move |v| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Ok(Some(v)));
            }
        })
        .on_error(move |err| {
            if let Some(tx) = on_error.lock().take() {
                let _ = tx.send(Err(err));
            }
        })
        .on_complete(move || {
            if let Some(tx) = on_complete.lock().take() {
                let _ = tx.send(Ok(None));
            }
        }),
    );

    // Guard создаётся до async-блока: future, брошенная без poll или по
    // таймауту, тоже снимает подписку.
    let guard = UnsubscribeOnDrop(subscription);
    async move {
        let _guard = guard;
        match rx.await {
            Ok(result) => result,
            // Источник отпустил подписчика, не отправив ничего.
            Err(_) => std::future::pending().await,
        }
    }
}

/// Снимает подписку при drop.
struct UnsubscribeOnDrop(Subscription);

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
