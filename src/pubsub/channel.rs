use std::{fmt, sync::Arc};

use ahash::AHashMap;
use parking_lot::{Mutex, ReentrantMutex};
use topicbus_error::{ensure, BusResult, PatternError, RequestError, ResultExt, StackError};
use tracing::{debug, warn};

use super::{
    intern::intern_topic,
    is_wildcard,
    matcher::validate_name,
    plugin::{downcast, PluginTable, RESERVED_CHANNEL_NAMES},
    ChannelPlugin, Envelope, MiddlewareSubject, Registration, ReplySubject, Request, Topic,
    TopicMatcher,
};
use crate::stream::{
    AsyncSubject, EndlessSubject, Item, Never, Observable, Observer, Subject, Subscriber,
    Subscription,
};

/// Канал: реестр топиков и поток событий "создан топик".
///
/// Топики создаются лениво по точному имени и живут столько же, сколько
/// канал. Поток созданных топиков replay'ится, поэтому подписка по шаблону
/// видит и топики, созданные до неё. Клоны канала разделяют одно состояние.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

struct ChannelInner<T> {
    name: Arc<str>,
    registry: Mutex<Registry<T>>,
    /// Сериализует создание топика и его анонс
    announce: ReentrantMutex<()>,
    created: EndlessSubject<Arc<Topic<T>>>,
    plugins: PluginTable<dyn ChannelPlugin<T>>,
}

struct Registry<T> {
    /// В порядке создания
    topics: Vec<Arc<Topic<T>>>,
    index: AHashMap<Arc<str>, usize>,
}

/// Результат [`Channel::observe`]: сам топик для точного имени или
/// объединённый поток всех подходящих топиков для шаблона.
pub enum Observation<T> {
    Topic(Arc<Topic<T>>),
    Pattern(PatternStream<T>),
}

/// Объединённый поток всех топиков канала, подходящих под шаблон,
/// включая созданные после подписки.
pub struct PatternStream<T> {
    matcher: TopicMatcher,
    created: EndlessSubject<Arc<Topic<T>>>,
}

/// Поток ответа на запрос.
pub enum ReplyStream<T> {
    /// Запрос доставлен, ответ придёт в этот subject
    Pending(ReplySubject<T>),
    /// Топика нет: поток никогда ничего не отдаст
    Unroutable(Never<T>),
}

////////////////////////////////////////////////////////////////////////////////
// Channel
////////////////////////////////////////////////////////////////////////////////

impl<T: Item> Channel<T> {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: Arc::from(name.as_ref()),
                registry: Mutex::new(Registry {
                    topics: Vec::new(),
                    index: AHashMap::new(),
                }),
                announce: ReentrantMutex::new(()),
                // Топики не удаляются: буфер не больше самого реестра
                created: EndlessSubject::with_replay(None),
                plugins: PluginTable::new(RESERVED_CHANNEL_NAMES),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Топик с данным именем; создаёт и анонсирует его при первом обращении.
    ///
    /// Имя проверяется по правилам шаблонов и не может содержать
    /// подстановок.
    pub fn topic(
        &self,
        name: &str,
    ) -> Result<Arc<Topic<T>>, PatternError> {
        let _announce = self.inner.announce.lock();
        if let Some(topic) = self.find_topic(name) {
            return Ok(topic);
        }
        validate_name(name)?;

        let topic = {
            let mut registry = self.inner.registry.lock();
            let topic = Arc::new(Topic::new(intern_topic(name)));
            let position = registry.topics.len();
            registry.topics.push(topic.clone());
            registry.index.insert(topic.name_arc().clone(), position);
            topic
        };
        debug!(channel = %self.inner.name, topic = name, "Topic created");

        self.inner.created.next(topic.clone());
        for plugin in self.inner.plugins.snapshot() {
            plugin.on_topic_created(self, &topic);
        }
        Ok(topic)
    }

    /// Синоним [`topic`](Self::topic).
    pub fn subject(
        &self,
        name: &str,
    ) -> Result<Arc<Topic<T>>, PatternError> {
        self.topic(name)
    }

    /// Поиск без создания.
    pub fn find_topic(
        &self,
        name: &str,
    ) -> Option<Arc<Topic<T>>> {
        let registry = self.inner.registry.lock();
        registry
            .index
            .get(name)
            .map(|&position| registry.topics[position].clone())
    }

    /// Имена топиков в порядке создания.
    pub fn topic_names(&self) -> Vec<Arc<str>> {
        self.inner
            .registry
            .lock()
            .topics
            .iter()
            .map(|t| t.name_arc().clone())
            .collect()
    }

    pub fn topic_count(&self) -> usize {
        self.inner.registry.lock().topics.len()
    }

    /// Поток топиков канала: сначала уже созданные, потом новые.
    pub fn created_topics(&self) -> &EndlessSubject<Arc<Topic<T>>> {
        &self.inner.created
    }

    /// Поток значений по имени или шаблону.
    ///
    /// Точное имя эквивалентно [`topic`](Self::topic). Шаблон даёт
    /// объединённый поток всех подходящих топиков, текущих и будущих.
    /// Значения, опубликованные до подписки, не повторяются.
    pub fn observe(
        &self,
        pattern: &str,
    ) -> Result<Observation<T>, PatternError> {
        let matcher = TopicMatcher::compile(pattern)?;
        if !matcher.is_wildcard() {
            return Ok(Observation::Topic(self.topic(pattern)?));
        }
        debug!(channel = %self.inner.name, pattern, "Pattern observed");
        Ok(Observation::Pattern(PatternStream {
            matcher,
            created: self.inner.created.clone(),
        }))
    }

    /// `observe(pattern)` + подписка.
    pub fn subscribe(
        &self,
        pattern: &str,
        subscriber: Subscriber<Envelope<T>>,
    ) -> Result<Subscription, PatternError> {
        Ok(self.observe(pattern)?.subscribe(subscriber))
    }

    /// Публикует значение в топик, создавая его при необходимости.
    pub fn publish(
        &self,
        name: &str,
        value: T,
    ) -> Result<(), StackError> {
        self.topic(name)?.publish(value)
    }

    /// Запрос с ответом в [`AsyncSubject`]: одно значение, затем завершение.
    ///
    /// Топик не создаётся. Если его нет, возвращается поток, который
    /// никогда ничего не отдаст. Шаблон вместо имени отклоняется с
    /// [`RequestError::WildcardTopic`].
    pub fn request(
        &self,
        name: &str,
        data: T,
    ) -> BusResult<ReplyStream<T>> {
        self.request_with(name, data, || -> Arc<dyn Subject<T>> {
            Arc::new(AsyncSubject::new())
        })
    }

    /// Запрос с собственным subject'ом для ответа, например
    /// [`PlainSubject`](crate::stream::PlainSubject) для нескольких значений.
    pub fn request_with<F>(
        &self,
        name: &str,
        data: T,
        factory: F,
    ) -> BusResult<ReplyStream<T>>
    where
        F: FnOnce() -> Arc<dyn Subject<T>>,
    {
        let wildcard = is_wildcard(name);
        if wildcard {
            warn!(channel = %self.inner.name, pattern = name, "Request to a pattern rejected");
        }
        ensure!(
            !wildcard,
            RequestError::WildcardTopic {
                pattern: name.to_string()
            }
        );
        let Some(topic) = self.find_topic(name) else {
            debug!(channel = %self.inner.name, topic = name, "Unroutable request");
            return Ok(ReplyStream::Unroutable(Never::new()));
        };

        let reply = MiddlewareSubject::new(factory(), topic.reply_middleware().clone())
            .forward_errors(true);
        topic
            .send(Envelope::Request(Request::new(data, reply.clone())))
            .with_context(|| format!("request to '{name}' in channel '{}'", self.inner.name))?;
        Ok(ReplyStream::Pending(reply))
    }

    /// Как [`request`](Self::request), но отсутствие топика - ошибка
    /// [`RequestError::Unroutable`].
    pub fn try_request(
        &self,
        name: &str,
        data: T,
    ) -> BusResult<ReplySubject<T>> {
        match self.request(name, data)? {
            ReplyStream::Pending(reply) => Ok(reply),
            ReplyStream::Unroutable(_) => Err(RequestError::Unroutable {
                topic: name.to_string(),
            }
            .into()),
        }
    }

    /// Регистрирует расширение. Первое определение побеждает: занятое или
    /// зарезервированное имя не перезаписывается.
    pub fn register_plugin(
        &self,
        plugin: Arc<dyn ChannelPlugin<T>>,
    ) -> Registration {
        let name = plugin.name().to_string();
        let outcome = self.inner.plugins.insert(&name, plugin.clone());
        if outcome.is_registered() {
            plugin.on_register(self);
        }
        outcome
    }

    /// Расширение по имени, приведённое к конкретному типу.
    pub fn extension<X>(
        &self,
        name: &str,
    ) -> Option<Arc<X>>
    where
        X: Send + Sync + 'static,
    {
        self.inner
            .plugins
            .get(name)
            .and_then(|plugin| downcast(plugin.into_any()))
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.inner.plugins.names()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.name)
            .field("topics", &self.inner.registry.lock().topics.len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Observation / PatternStream
////////////////////////////////////////////////////////////////////////////////

impl<T: Item> PatternStream<T> {
    pub fn pattern(&self) -> &str {
        self.matcher.pattern()
    }
}

impl<T: Item> Observable<Envelope<T>> for PatternStream<T> {
    fn subscribe(
        &self,
        subscriber: Subscriber<Envelope<T>>,
    ) -> Subscription {
        // None после отписки: топики, пришедшие позже, сразу отпускаются
        let inner: Arc<Mutex<Option<Vec<Subscription>>>> = Arc::new(Mutex::new(Some(Vec::new())));
        let matcher = self.matcher.clone();
        let sink = inner.clone();

        let meta = self.created.subscribe(Subscriber::new(move |topic: Arc<Topic<T>>| {
            if !matcher.matches(topic.name()) {
                return;
            }
            let subscription = topic.subscribe(subscriber.clone());
            let mut guard = sink.lock();
            match guard.as_mut() {
                Some(subscriptions) => subscriptions.push(subscription),
                None => {
                    drop(guard);
                    subscription.unsubscribe();
                }
            }
        }));

        Subscription::new(move || {
            meta.unsubscribe();
            let subscriptions = inner.lock().take();
            for subscription in subscriptions.into_iter().flatten() {
                subscription.unsubscribe();
            }
        })
    }
}

impl<T> Clone for PatternStream<T> {
    fn clone(&self) -> Self {
        Self {
            matcher: self.matcher.clone(),
            created: self.created.clone(),
        }
    }
}

impl<T> fmt::Debug for PatternStream<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PatternStream")
            .field("pattern", &self.matcher.pattern())
            .finish()
    }
}

impl<T: Item> Observation<T> {
    /// Подписка только на полезную нагрузку.
    pub fn subscribe_data(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        self.subscribe(subscriber.contramap(Envelope::into_data))
    }

    /// Топик, если наблюдалось точное имя.
    pub fn as_topic(&self) -> Option<&Arc<Topic<T>>> {
        match self {
            Observation::Topic(topic) => Some(topic),
            Observation::Pattern(_) => None,
        }
    }
}

impl<T: Item> Observable<Envelope<T>> for Observation<T> {
    fn subscribe(
        &self,
        subscriber: Subscriber<Envelope<T>>,
    ) -> Subscription {
        match self {
            Observation::Topic(topic) => topic.subscribe(subscriber),
            Observation::Pattern(stream) => stream.subscribe(subscriber),
        }
    }
}

impl<T> fmt::Debug for Observation<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Observation::Topic(topic) => f.debug_tuple("Topic").field(topic).finish(),
            Observation::Pattern(stream) => f.debug_tuple("Pattern").field(stream).finish(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// ReplyStream
////////////////////////////////////////////////////////////////////////////////

impl<T: Item> ReplyStream<T> {
    pub fn is_unroutable(&self) -> bool {
        matches!(self, ReplyStream::Unroutable(_))
    }
}

impl<T: Item> Observable<T> for ReplyStream<T> {
    fn subscribe(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        match self {
            ReplyStream::Pending(reply) => reply.subscribe(subscriber),
            ReplyStream::Unroutable(never) => never.subscribe(subscriber),
        }
    }
}

impl<T> fmt::Debug for ReplyStream<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ReplyStream::Pending(_) => f.write_str("ReplyStream::Pending"),
            ReplyStream::Unroutable(_) => f.write_str("ReplyStream::Unroutable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        any::Any,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use topicbus_error::{GenericError, StatusCode};

    use super::*;
    use crate::stream::PlainSubject;

    fn collect(observation: &Observation<i32>) -> (Arc<Mutex<Vec<i32>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = observation.subscribe_data(Subscriber::new(move |v| s.lock().push(v)));
        (seen, sub)
    }

    #[test]
    fn test_topic_is_idempotent() {
        let channel: Channel<i32> = Channel::new("c");
        let a = channel.topic("orders.created").unwrap();
        let b = channel.subject("orders.created").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(channel.topic_count(), 1);
        assert_eq!(
            channel.find_topic("orders.created").map(|t| t.name().to_string()),
            Some("orders.created".to_string())
        );
        assert!(channel.find_topic("nope").is_none());
    }

    #[test]
    fn test_topic_names_in_creation_order() {
        let channel: Channel<i32> = Channel::new("c");
        channel.topic("b").unwrap();
        channel.topic("a").unwrap();
        channel.topic("b").unwrap();
        let names: Vec<String> = channel.topic_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    /// Подписка по шаблону получает значения топика, созданного позже.
    #[test]
    fn test_pattern_sees_future_topics() {
        let channel: Channel<i32> = Channel::new("c");
        let observation = channel.observe("orders.#").unwrap();
        assert!(observation.as_topic().is_none());
        let (seen, _sub) = collect(&observation);

        channel.publish("orders.created", 1).unwrap();
        channel.publish("users.created", 2).unwrap();
        channel.publish("orders.deleted", 3).unwrap();

        assert_eq!(*seen.lock(), vec![1, 3]);
    }

    /// И топики, созданные до подписки, тоже.
    #[test]
    fn test_pattern_sees_existing_topics() {
        let channel: Channel<i32> = Channel::new("c");
        channel.topic("a.b").unwrap();
        channel.topic("a.c").unwrap();
        let (seen, _sub) = collect(&channel.observe("a.*").unwrap());

        channel.publish("a.b", 1).unwrap();
        channel.publish("a.c", 2).unwrap();
        channel.publish("a.b.c", 3).unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    /// Поздний шаблон видит все ранее созданные топики, сколько бы их ни было.
    #[test]
    fn test_late_pattern_sees_every_existing_topic() {
        let channel: Channel<i32> = Channel::new("c");
        for i in 0..64 {
            channel.topic(&format!("a.t{i}")).unwrap();
        }
        let (seen, _sub) = collect(&channel.observe("a.*").unwrap());

        for i in 0..64 {
            channel.publish(&format!("a.t{i}"), i).unwrap();
        }

        assert_eq!(*seen.lock(), (0..64).collect::<Vec<_>>());
        assert_eq!(channel.created_topics().buffered(), channel.topic_count());
    }

    /// Имена, которые нельзя наблюдать, нельзя и создать.
    #[test]
    fn test_invalid_topic_names_rejected() {
        let channel: Channel<i32> = Channel::new("c");
        assert_eq!(channel.topic("").unwrap_err(), PatternError::EmptyPattern);
        assert!(matches!(
            channel.topic("a..b").unwrap_err(),
            PatternError::EmptySegment { index: 1, .. }
        ));
        assert!(matches!(
            channel.subject("a.*").unwrap_err(),
            PatternError::WildcardName { .. }
        ));
        let err = channel.publish("a..b", 1).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidPattern);
        assert_eq!(channel.topic_count(), 0);
    }

    /// После отписки и повторной подписки старые значения не повторяются.
    #[test]
    fn test_resubscribe_does_not_replay_values() {
        let channel: Channel<i32> = Channel::new("c");
        let observation = channel.observe("x.#").unwrap();
        let (first, sub) = collect(&observation);
        channel.publish("x.one", 1).unwrap();
        sub.unsubscribe();
        channel.publish("x.one", 2).unwrap();
        channel.publish("x.two", 3).unwrap();

        let (second, _sub) = collect(&channel.observe("x.#").unwrap());
        channel.publish("x.two", 4).unwrap();

        assert_eq!(*first.lock(), vec![1]);
        assert_eq!(*second.lock(), vec![4]);
    }

    #[test]
    fn test_invalid_pattern() {
        let channel: Channel<i32> = Channel::new("c");
        assert!(matches!(
            channel.observe("a..#").unwrap_err(),
            PatternError::EmptySegment { .. }
        ));
        assert_eq!(channel.topic_count(), 0);
    }

    /// Запрос в несуществующий топик не создаёт его и ничего не отдаёт.
    #[test]
    fn test_unroutable_request() {
        let channel: Channel<i32> = Channel::new("c");
        let reply = channel.request("nobody", 1).unwrap();
        assert!(reply.is_unroutable());
        let sub = reply.subscribe(Subscriber::new(|_| panic!("must not emit")).on_error(|_| {
            panic!("must not error")
        }));
        assert!(sub.is_closed());
        assert!(channel.find_topic("nobody").is_none());

        let err = channel.try_request("nobody", 1).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Unroutable);
    }

    #[test]
    fn test_wildcard_request_rejected() {
        let channel: Channel<i32> = Channel::new("c");
        let err = channel.request("a.*", 1).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RequestError>(),
            Some(&RequestError::WildcardTopic {
                pattern: "a.*".to_string()
            })
        );
    }

    /// Отказ исходящего middleware возвращается запросившему с контекстом.
    #[test]
    fn test_request_middleware_failure_has_context() {
        let channel: Channel<i32> = Channel::new("c");
        let topic = channel.topic("guarded").unwrap();
        topic
            .middleware()
            .add_with_id("deny", |_: i32| {
                Err(StackError::new(GenericError::new(
                    StatusCode::InvalidValue,
                    "denied",
                )))
            })
            .unwrap();

        let err = channel.request("guarded", 1).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::MiddlewareFailed);
        assert_eq!(err.contexts().len(), 1);
        assert_eq!(err.contexts()[0].message, "request to 'guarded' in channel 'c'");
    }

    /// Reply middleware применяется к каждому значению ответа.
    #[test]
    fn test_request_with_reply_middleware() {
        let channel: Channel<i32> = Channel::new("c");
        let topic = channel.topic("math.double").unwrap();
        topic.reply_middleware().add(|v: i32| Ok(v + 1));
        let _responder = topic.subscribe(Subscriber::new(|env: Envelope<i32>| {
            if let Some(request) = env.as_request() {
                let reply = request.reply();
                reply.next(*request.data() * 2);
                reply.next(*request.data() * 3);
                reply.complete();
            }
        }));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));
        let (s, d) = (seen.clone(), done.clone());
        let reply = channel
            .request_with("math.double", 10, || -> Arc<dyn Subject<i32>> {
                Arc::new(PlainSubject::new())
            })
            .unwrap();
        // PlainSubject не replay'ит: ответ уже ушёл, поздний подписчик
        // получает только завершение
        reply.subscribe(Subscriber::new(move |v| s.lock().push(v)).on_complete(move || {
            d.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(seen.lock().is_empty());
        assert_eq!(done.load(Ordering::SeqCst), 1);

        let single = channel.request("math.double", 5).unwrap();
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();
        single.subscribe(Subscriber::new(move |v| g.lock().push(v)));
        // AsyncSubject отдаёт последнее значение: 5 * 3 + 1
        assert_eq!(*got.lock(), vec![16]);
    }

    struct Audit {
        created: AtomicUsize,
    }

    impl ChannelPlugin<i32> for Audit {
        fn name(&self) -> &str {
            "audit"
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }

        fn on_topic_created(
            &self,
            _channel: &Channel<i32>,
            _topic: &Arc<Topic<i32>>,
        ) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_plugin_hooks_and_lookup() {
        let channel: Channel<i32> = Channel::new("c");
        let audit = Arc::new(Audit {
            created: AtomicUsize::new(0),
        });
        assert_eq!(channel.register_plugin(audit.clone()), Registration::Registered);
        assert_eq!(
            channel.register_plugin(Arc::new(Audit {
                created: AtomicUsize::new(0)
            })),
            Registration::AlreadyDefined
        );

        channel.topic("a").unwrap();
        channel.topic("b").unwrap();
        channel.topic("a").unwrap();

        let found = channel.extension::<Audit>("audit").unwrap();
        assert!(Arc::ptr_eq(&found, &audit));
        assert_eq!(found.created.load(Ordering::SeqCst), 2);
        assert!(channel.extension::<String>("audit").is_none());
    }
}
