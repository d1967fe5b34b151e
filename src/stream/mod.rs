//! Примитивы мультикаст-потоков, на которых построена шина.
//!
//! Модель push-based: источник синхронно вызывает колбэки подписчиков в
//! потоке издателя. Отписка только явная, через [`Subscription`].

pub mod async_subject;
pub mod endless;
pub mod ops;
pub mod subject;
pub mod subscriber;

mod observers;

pub use async_subject::AsyncSubject;
pub use endless::EndlessSubject;
pub use ops::{first_value, Filter, Never, ObservableExt};
pub use subject::PlainSubject;
pub use subscriber::{Subscriber, Subscription};

use topicbus_error::StackError;

/// Значение, которое может ходить по потокам шины.
pub trait Item: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Item for T {}

/// Принимающая сторона потока.
pub trait Observer<T>: Send + Sync {
    fn next(
        &self,
        value: T,
    );

    fn error(
        &self,
        err: StackError,
    );

    fn complete(&self);
}

/// Источник значений, на который можно подписаться.
pub trait Observable<T>: Send + Sync {
    /// Подключает подписчика и возвращает handle для отписки.
    fn subscribe(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription;
}

/// Subject: одновременно и приёмник, и источник.
pub trait Subject<T>: Observer<T> + Observable<T> {}

impl<T, S> Subject<T> for S where S: Observer<T> + Observable<T> {}

impl<T, O> Observer<T> for std::sync::Arc<O>
where
    O: Observer<T> + ?Sized,
{
    fn next(
        &self,
        value: T,
    ) {
        (**self).next(value)
    }

    fn error(
        &self,
        err: StackError,
    ) {
        (**self).error(err)
    }

    fn complete(&self) {
        (**self).complete()
    }
}

impl<T, O> Observable<T> for std::sync::Arc<O>
where
    O: Observable<T> + ?Sized,
{
    fn subscribe(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        (**self).subscribe(subscriber)
    }
}
