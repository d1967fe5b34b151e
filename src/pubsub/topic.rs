use std::{fmt, sync::Arc};

use topicbus_error::{DeliveryError, LogLevel, MiddlewareError, StackError};
use tracing::trace;

use super::{ApplyState, MiddlewarePipeline, MiddlewareSubject};
use crate::stream::{
    EndlessSubject, Item, Observable, Observer, Subject, Subscriber, Subscription,
};

/// Событие на уровне, который рекомендует код ошибки.
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Error => tracing::error!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Trace => tracing::trace!($($arg)+),
        }
    };
}

/// Поток ответа на запрос.
pub type ReplySubject<T> = MiddlewareSubject<T, Arc<dyn Subject<T>>>;

/// Значение, которое несёт топик.
#[derive(Clone)]
pub enum Envelope<T> {
    /// Обычная публикация
    Publish(T),
    /// Запрос с потоком для ответа
    Request(Request<T>),
}

/// Запрос: данные и поток, в который отвечающая сторона пишет ответ.
///
/// Сам поток и есть канал корреляции, id запроса не нужен.
pub struct Request<T> {
    data: T,
    reply: ReplySubject<T>,
}

/// Именованный, никогда не закрывающийся мультикаст-поток.
///
/// Исходящие значения проходят через [`middleware`](Self::middleware)
/// (полезная нагрузка и публикаций, и запросов). Ответы на запросы,
/// полученные через канал, проходят через
/// [`reply_middleware`](Self::reply_middleware).
pub struct Topic<T> {
    name: Arc<str>,
    subject: MiddlewareSubject<Envelope<T>, EndlessSubject<Envelope<T>>, T>,
    reply_middleware: MiddlewarePipeline<T>,
}

////////////////////////////////////////////////////////////////////////////////
// Envelope / Request
////////////////////////////////////////////////////////////////////////////////

impl<T> Envelope<T> {
    pub fn data(&self) -> &T {
        match self {
            Envelope::Publish(data) => data,
            Envelope::Request(request) => &request.data,
        }
    }

    pub fn into_data(self) -> T {
        match self {
            Envelope::Publish(data) => data,
            Envelope::Request(request) => request.data,
        }
    }

    pub fn as_request(&self) -> Option<&Request<T>> {
        match self {
            Envelope::Request(request) => Some(request),
            Envelope::Publish(_) => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Envelope::Request(_))
    }

    /// Прогоняет полезную нагрузку через `f`, сохраняя вид конверта.
    pub fn try_map_data<F>(
        self,
        f: F,
    ) -> Result<Self, StackError>
    where
        F: FnOnce(T) -> Result<T, StackError>,
    {
        Ok(match self {
            Envelope::Publish(data) => Envelope::Publish(f(data)?),
            Envelope::Request(Request { data, reply }) => Envelope::Request(Request {
                data: f(data)?,
                reply,
            }),
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Envelope<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Envelope::Publish(data) => f.debug_tuple("Publish").field(data).finish(),
            Envelope::Request(request) => f.debug_tuple("Request").field(request).finish(),
        }
    }
}

impl<T: Item> Request<T> {
    pub(crate) fn new(
        data: T,
        reply: ReplySubject<T>,
    ) -> Self {
        Self { data, reply }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Поток ответа. `next`/`complete`/`error` на нём видит запросившая
    /// сторона.
    pub fn reply(&self) -> &ReplySubject<T> {
        &self.reply
    }

    /// Одиночный ответ: значение и завершение.
    pub fn respond(
        &self,
        value: T,
    ) {
        self.reply.next(value);
        self.reply.complete();
    }

    /// Отклоняет запрос ошибкой [`DeliveryError::Rejected`].
    pub fn reject(
        &self,
        reason: impl Into<String>,
    ) {
        self.reply.error(StackError::new(DeliveryError::Rejected {
            reason: reason.into(),
        }));
    }
}

impl<T: Clone> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            reply: self.reply.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Request<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Request").field("data", &self.data).finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Topic
////////////////////////////////////////////////////////////////////////////////

impl<T: Item> Topic<T> {
    pub(crate) fn new(name: Arc<str>) -> Self {
        Self {
            name,
            subject: MiddlewareSubject::with_apply(
                EndlessSubject::new(),
                MiddlewarePipeline::new(),
                |pipeline, envelope: Envelope<T>| envelope.try_map_data(|d| pipeline.apply(d)),
            ),
            reply_middleware: MiddlewarePipeline::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Конвейер исходящих значений.
    pub fn middleware(&self) -> &MiddlewarePipeline<T> {
        self.subject.middleware()
    }

    /// Конвейер ответов на запросы к этому топику.
    pub fn reply_middleware(&self) -> &MiddlewarePipeline<T> {
        &self.reply_middleware
    }

    /// Публикует значение всем текущим подписчикам.
    ///
    /// Сначала применяется middleware; если оно вернуло ошибку, значение
    /// не доставляется, а ошибка возвращается издателю.
    pub fn publish(
        &self,
        value: T,
    ) -> Result<(), StackError> {
        self.send(Envelope::Publish(value))
    }

    /// Публикует готовый конверт.
    pub fn send(
        &self,
        envelope: Envelope<T>,
    ) -> Result<(), StackError> {
        trace!(topic = %self.name, request = envelope.is_request(), "Publish");
        self.subject.try_next(envelope).inspect_err(|err| {
            let middleware = err
                .downcast_ref::<MiddlewareError>()
                .map(|e| e.id().to_string());
            event_at!(
                err.log_level(),
                topic = %self.name,
                middleware = ?middleware,
                error = %err,
                "Middleware rejected value"
            );
        })
    }

    /// Рассылает ошибку всем подписчикам. Подписки остаются активными.
    pub fn publish_error(
        &self,
        err: StackError,
    ) {
        event_at!(
            err.log_level(),
            topic = %self.name,
            critical = err.is_critical(),
            error = %err,
            "Error broadcast"
        );
        self.subject.error(err)
    }

    /// Рассылает [`DeliveryError::Published`] с заданной причиной.
    pub fn fail(
        &self,
        reason: impl Into<String>,
    ) {
        self.publish_error(StackError::new(DeliveryError::Published {
            topic: self.name.to_string(),
            reason: reason.into(),
        }))
    }

    /// Ничего не завершает: топик открыт всегда. Во время применения
    /// middleware запрос откладывается до доставки значения.
    pub fn complete(&self) {
        self.subject.complete()
    }

    /// Подписка только на полезную нагрузку (без конвертов).
    pub fn subscribe_data(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        self.subject.subscribe(subscriber.contramap(Envelope::into_data))
    }

    pub fn observer_count(&self) -> usize {
        self.subject.inner().observer_count()
    }

    pub fn apply_state(&self) -> ApplyState {
        self.subject.state()
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Topic").field("name", &self.name).finish()
    }
}

impl<T: Item> Observer<Envelope<T>> for Topic<T> {
    fn next(
        &self,
        value: Envelope<T>,
    ) {
        let _ = self.send(value);
    }

    fn error(
        &self,
        err: StackError,
    ) {
        self.publish_error(err)
    }

    fn complete(&self) {
        Topic::complete(self)
    }
}

impl<T: Item> Observable<Envelope<T>> for Topic<T> {
    fn subscribe(
        &self,
        subscriber: Subscriber<Envelope<T>>,
    ) -> Subscription {
        self.subject.subscribe(subscriber)
    }
}
