use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use super::{Subscriber, Subscription};

/// Общий список подписчиков subject'а.
///
/// `emit` сериализует рассылку: значения одного subject'а доставляются в
/// порядке вызовов. Блокировка реентерабельна, колбэк может синхронно
/// публиковать в тот же subject из того же потока.
pub(crate) struct ObserverList<T> {
    emit: ReentrantMutex<()>,
    next_key: AtomicU64,
    entries: RwLock<Vec<(u64, Subscriber<T>)>>,
}

impl<T: 'static> ObserverList<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            emit: ReentrantMutex::new(()),
            next_key: AtomicU64::new(0),
            entries: RwLock::new(Vec::new()),
        })
    }

    pub(crate) fn gate(&self) -> ReentrantMutexGuard<'_, ()> {
        self.emit.lock()
    }

    /// Добавляет подписчика в конец списка.
    /// Отписка держит только `Weak`, чтобы не продлевать жизнь subject'а.
    pub(crate) fn add(
        self: &Arc<Self>,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((key, subscriber));

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(list) = weak.upgrade() {
                list.remove(key);
            }
        })
    }

    fn remove(
        &self,
        key: u64,
    ) {
        self.entries.write().retain(|(k, _)| *k != key);
    }

    /// Снимок подписчиков в порядке подключения.
    pub(crate) fn snapshot(&self) -> Vec<Subscriber<T>> {
        self.entries.read().iter().map(|(_, s)| s.clone()).collect()
    }

    /// Забирает всех подписчиков, оставляя список пустым.
    pub(crate) fn drain(&self) -> Vec<Subscriber<T>> {
        std::mem::take(&mut *self.entries.write())
            .into_iter()
            .map(|(_, s)| s)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
