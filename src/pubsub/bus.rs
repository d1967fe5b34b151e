use std::{fmt, sync::Arc};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use topicbus_error::{BusResult, PatternError, StackError};
use tracing::{debug, info};

use super::{
    plugin::{downcast, PluginTable, RESERVED_BUS_NAMES},
    BusPlugin, Channel, ChannelPlugin, Envelope, Observation, Registration, ReplyStream,
};
use crate::stream::{Item, Subscriber, Subscription};

/// Параметры шины.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusOptions {
    /// Канал, используемый операциями шины без явного канала
    pub default_channel: String,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            default_channel: "default".to_string(),
        }
    }
}

/// Реестр каналов с расширениями.
///
/// Каналы создаются лениво по имени. Операции `observe`/`subscribe`/
/// `publish`/`request` самой шины работают с каналом по умолчанию.
/// Клоны шины разделяют одно состояние.
pub struct Bus<T> {
    inner: Arc<BusInner<T>>,
}

struct BusInner<T> {
    options: BusOptions,
    channels: DashMap<Arc<str>, Channel<T>>,
    /// Применяются к каждому каналу, включая созданные позже
    channel_plugins: RwLock<Vec<Arc<dyn ChannelPlugin<T>>>>,
    plugins: PluginTable<dyn BusPlugin<T>>,
}

impl<T: Item> Bus<T> {
    pub fn new() -> Self {
        Self::with_options(BusOptions::default())
    }

    pub fn with_options(options: BusOptions) -> Self {
        info!(default_channel = %options.default_channel, "Bus created");
        Self {
            inner: Arc::new(BusInner {
                options,
                channels: DashMap::new(),
                channel_plugins: RwLock::new(Vec::new()),
                plugins: PluginTable::new(RESERVED_BUS_NAMES),
            }),
        }
    }

    pub fn options(&self) -> &BusOptions {
        &self.inner.options
    }

    /// Канал по имени; создаётся при первом обращении.
    pub fn channel(
        &self,
        name: &str,
    ) -> Channel<T> {
        if let Some(channel) = self.inner.channels.get(name) {
            return channel.clone();
        }

        // Канал строится вне шарда карты: плагины могут обращаться к шине
        let candidate = Channel::new(name);
        let channel = self
            .inner
            .channels
            .entry(Arc::from(name))
            .or_insert(candidate)
            .clone();
        debug!(channel = name, "Channel ready");

        // Повторное применение безопасно: первое определение побеждает
        let plugins: Vec<_> = self.inner.channel_plugins.read().clone();
        for plugin in plugins {
            channel.register_plugin(plugin);
        }
        channel
    }

    pub fn default_channel(&self) -> Channel<T> {
        self.channel(&self.inner.options.default_channel)
    }

    /// Имена каналов (порядок не определён).
    pub fn channel_names(&self) -> Vec<String> {
        self.inner
            .channels
            .iter()
            .map(|entry| entry.key().to_string())
            .collect()
    }

    pub fn observe(
        &self,
        pattern: &str,
    ) -> Result<Observation<T>, PatternError> {
        self.default_channel().observe(pattern)
    }

    pub fn observe_in(
        &self,
        channel: &str,
        pattern: &str,
    ) -> Result<Observation<T>, PatternError> {
        self.channel(channel).observe(pattern)
    }

    pub fn subscribe(
        &self,
        pattern: &str,
        subscriber: Subscriber<Envelope<T>>,
    ) -> Result<Subscription, PatternError> {
        self.default_channel().subscribe(pattern, subscriber)
    }

    pub fn subscribe_in(
        &self,
        channel: &str,
        pattern: &str,
        subscriber: Subscriber<Envelope<T>>,
    ) -> Result<Subscription, PatternError> {
        self.channel(channel).subscribe(pattern, subscriber)
    }

    pub fn publish(
        &self,
        topic: &str,
        value: T,
    ) -> Result<(), StackError> {
        self.default_channel().publish(topic, value)
    }

    pub fn publish_in(
        &self,
        channel: &str,
        topic: &str,
        value: T,
    ) -> Result<(), StackError> {
        self.channel(channel).publish(topic, value)
    }

    pub fn request(
        &self,
        topic: &str,
        data: T,
    ) -> BusResult<ReplyStream<T>> {
        self.default_channel().request(topic, data)
    }

    pub fn request_in(
        &self,
        channel: &str,
        topic: &str,
        data: T,
    ) -> BusResult<ReplyStream<T>> {
        self.channel(channel).request(topic, data)
    }

    /// Регистрирует расширение шины.
    pub fn register_plugin(
        &self,
        plugin: Arc<dyn BusPlugin<T>>,
    ) -> Registration {
        let name = plugin.name().to_string();
        let outcome = self.inner.plugins.insert(&name, plugin.clone());
        if outcome.is_registered() {
            plugin.on_register(self);
        }
        outcome
    }

    /// Регистрирует расширение для всех каналов: существующих и будущих.
    pub fn register_channel_plugin(
        &self,
        plugin: Arc<dyn ChannelPlugin<T>>,
    ) {
        self.inner.channel_plugins.write().push(plugin.clone());
        let channels: Vec<Channel<T>> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for channel in channels {
            channel.register_plugin(plugin.clone());
        }
    }

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

impl<T: Item> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Bus<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Bus")
            .field("options", &self.inner.options)
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}
