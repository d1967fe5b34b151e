use std::{any::Any, fmt, sync::Arc};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{Bus, Channel, Topic};
use crate::stream::Item;

/// Имена встроенных операций канала. Плагин с таким именем не
/// регистрируется.
pub const RESERVED_CHANNEL_NAMES: &[&str] = &[
    "topic",
    "subject",
    "observe",
    "publish",
    "request",
    "subscribe",
    "register_plugin",
];

/// Имена встроенных операций шины.
pub const RESERVED_BUS_NAMES: &[&str] = &[
    "channel",
    "observe",
    "subscribe",
    "publish",
    "request",
    "register_plugin",
    "register_channel_plugin",
];

/// Расширение канала.
///
/// Обязательны только `name` и `into_any`, хуки опциональны.
pub trait ChannelPlugin<T: Item>: Send + Sync + 'static {
    /// Имя, под которым расширение доступно через
    /// [`Channel::extension`].
    fn name(&self) -> &str;

    /// Для typed lookup. Реализация всегда `self`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Вызывается один раз при успешной регистрации в канале.
    fn on_register(
        &self,
        _channel: &Channel<T>,
    ) {
    }

    /// Вызывается для каждого нового топика канала.
    fn on_topic_created(
        &self,
        _channel: &Channel<T>,
        _topic: &Arc<Topic<T>>,
    ) {
    }
}

/// Расширение шины.
pub trait BusPlugin<T: Item>: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn on_register(
        &self,
        _bus: &Bus<T>,
    ) {
    }
}

/// Результат регистрации.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// Имя уже занято: побеждает первое определение
    AlreadyDefined,
    /// Имя совпадает со встроенной операцией
    Reserved,
}

impl Registration {
    pub fn is_registered(self) -> bool {
        self == Registration::Registered
    }
}

/// Таблица расширений с правилом "первое определение побеждает".
pub(crate) struct PluginTable<P: ?Sized> {
    reserved: &'static [&'static str],
    entries: RwLock<Vec<(Arc<str>, Arc<P>)>>,
}

impl<P: ?Sized> PluginTable<P> {
    pub(crate) fn new(reserved: &'static [&'static str]) -> Self {
        Self {
            reserved,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn insert(
        &self,
        name: &str,
        plugin: Arc<P>,
    ) -> Registration {
        if self.reserved.iter().any(|r| *r == name) {
            debug!(plugin = name, "Plugin name is reserved, skipped");
            return Registration::Reserved;
        }
        let mut entries = self.entries.write();
        if entries.iter().any(|(n, _)| &**n == name) {
            debug!(plugin = name, "Plugin already defined, skipped");
            return Registration::AlreadyDefined;
        }
        entries.push((Arc::from(name), plugin));
        info!(plugin = name, "Plugin registered");
        Registration::Registered
    }

    pub(crate) fn get(
        &self,
        name: &str,
    ) -> Option<Arc<P>> {
        self.entries
            .read()
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, p)| p.clone())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|(n, _)| n.to_string())
            .collect()
    }

    /// Снимок в порядке регистрации.
    pub(crate) fn snapshot(&self) -> Vec<Arc<P>> {
        self.entries.read().iter().map(|(_, p)| p.clone()).collect()
    }
}

impl<P: ?Sized> fmt::Debug for PluginTable<P> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PluginTable")
            .field("names", &self.names())
            .finish()
    }
}

/// Downcast расширения к конкретному типу.
pub(crate) fn downcast<X>(any: Arc<dyn Any + Send + Sync>) -> Option<Arc<X>>
where
    X: Send + Sync + 'static,
{
    any.downcast::<X>().ok()
}
