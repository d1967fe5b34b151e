use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Пул для повторного использования Arc<str> по одинаковым именам топиков.
/// Одно и то же имя в разных каналах делит одну аллокацию.
static TOPIC_INTERN: Lazy<DashMap<Box<str>, Arc<str>>> = Lazy::new(DashMap::new);

/// Возвращает interned Arc<str> для имени топика.
/// При первом вызове для нового имени создаёт Arc<str> и сохраняет его в пуле.
#[inline]
pub(crate) fn intern_topic<S: AsRef<str>>(name: S) -> Arc<str> {
    let key = name.as_ref();
    if let Some(existing) = TOPIC_INTERN.get(key) {
        return existing.clone();
    }
    // entry() закрывает гонку двух первых вставок одного имени
    TOPIC_INTERN
        .entry(Box::from(key))
        .or_insert_with(|| Arc::from(key))
        .clone()
}
