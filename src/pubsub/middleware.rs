use std::{
    convert::Infallible,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use ahash::AHashSet;
use parking_lot::{ReentrantMutex, RwLock};
use topicbus_error::{MiddlewareError, StackError};
use tracing::{debug, trace};

use crate::stream::{AsyncSubject, EndlessSubject, Item, Observable, ObservableExt, Observer};

/// Функция трансформации значения.
pub type TransformFn<T> = Arc<dyn Fn(T) -> Result<T, StackError> + Send + Sync>;

/// Идентификатор записи конвейера.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MiddlewareId(Arc<str>);

impl MiddlewareId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MiddlewareId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MiddlewareId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl PartialEq<str> for MiddlewareId {
    fn eq(
        &self,
        other: &str,
    ) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for MiddlewareId {
    fn eq(
        &self,
        other: &&str,
    ) -> bool {
        &*self.0 == *other
    }
}

/// Запись конвейера. После вставки не меняется.
pub struct MiddlewareEntry<T> {
    id: MiddlewareId,
    /// Позиция в арене
    slot: usize,
    /// Поколение арены; `clear()` начинает новое
    generation: u64,
    transform: TransformFn<T>,
}

/// Упорядоченный изменяемый набор трансформаций.
///
/// Записи лежат в арене в порядке добавления. Удаление мягкое: слот
/// попадает в набор tombstone'ов и исключается из всех последующих
/// вычислений, физически записи уходят только на `clear()`.
/// Каждое добавление анонсируется в replay-поток, на котором построен
/// [`list`](Self::list).
pub struct MiddlewarePipeline<T> {
    inner: Arc<PipelineInner<T>>,
}

struct PipelineInner<T> {
    state: RwLock<PipelineState<T>>,
    /// Счётчик авто-id, на `clear()` не сбрасывается
    counter: AtomicU64,
    /// Сериализует вставку и анонс, чтобы порядок в `list()` совпадал с ареной
    announce: ReentrantMutex<()>,
}

struct PipelineState<T> {
    entries: Vec<MiddlewareEntry<T>>,
    tombstones: AHashSet<usize>,
    generation: u64,
    changes: EndlessSubject<MiddlewareEntry<T>>,
}

////////////////////////////////////////////////////////////////////////////////
// MiddlewareEntry
////////////////////////////////////////////////////////////////////////////////

impl<T> MiddlewareEntry<T> {
    pub fn id(&self) -> &MiddlewareId {
        &self.id
    }

    /// Применяет трансформацию. Паника внутри функции превращается в
    /// [`MiddlewareError::TransformPanicked`], ошибка оборачивается в
    /// [`MiddlewareError::TransformFailed`].
    pub fn apply(
        &self,
        value: T,
    ) -> Result<T, StackError> {
        let transform = &self.transform;
        match catch_unwind(AssertUnwindSafe(|| transform(value))) {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(err)) => Err(match err.downcast_ref::<MiddlewareError>() {
                Some(_) => err,
                None => StackError::new(MiddlewareError::TransformFailed {
                    id: self.id.to_string(),
                    reason: err.to_string(),
                }),
            }),
            Err(_) => Err(StackError::new(MiddlewareError::TransformPanicked {
                id: self.id.to_string(),
            })),
        }
    }
}

impl<T> Clone for MiddlewareEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            slot: self.slot,
            generation: self.generation,
            transform: self.transform.clone(),
        }
    }
}

impl<T> fmt::Debug for MiddlewareEntry<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// MiddlewarePipeline
////////////////////////////////////////////////////////////////////////////////

impl<T: Item> PipelineState<T> {
    fn empty(generation: u64) -> Self {
        Self {
            entries: Vec::new(),
            tombstones: AHashSet::new(),
            generation,
            changes: EndlessSubject::with_replay(None),
        }
    }

    fn is_active(
        &self,
        entry: &MiddlewareEntry<T>,
    ) -> bool {
        entry.generation == self.generation && !self.tombstones.contains(&entry.slot)
    }

    fn find_active(
        &self,
        id: &str,
    ) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.id == *id && !self.tombstones.contains(&e.slot))
            .map(|e| e.slot)
    }

    fn active(&self) -> impl Iterator<Item = &MiddlewareEntry<T>> {
        self.entries
            .iter()
            .filter(|e| !self.tombstones.contains(&e.slot))
    }
}

impl<T: Item> MiddlewarePipeline<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                state: RwLock::new(PipelineState::empty(0)),
                counter: AtomicU64::new(0),
                announce: ReentrantMutex::new(()),
            }),
        }
    }

    /// Добавляет трансформацию в конец с автоматическим id вида
    /// `middleware_N`.
    pub fn add<F>(
        &self,
        transform: F,
    ) -> MiddlewareId
    where
        F: Fn(T) -> Result<T, StackError> + Send + Sync + 'static,
    {
        let counter = &self.inner.counter;
        let generated = self.insert(Arc::new(transform), |state| {
            Ok::<_, Infallible>(loop {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                let candidate = MiddlewareId::new(format!("middleware_{n}"));
                if state.find_active(candidate.as_str()).is_none() {
                    break candidate;
                }
            })
        });
        match generated {
            Ok(id) => id,
            Err(never) => match never {},
        }
    }

    /// Добавляет трансформацию с заданным id.
    ///
    /// Id занят, только пока запись с ним активна: после `remove` его
    /// можно использовать снова.
    pub fn add_with_id<F>(
        &self,
        id: impl AsRef<str>,
        transform: F,
    ) -> Result<MiddlewareId, MiddlewareError>
    where
        F: Fn(T) -> Result<T, StackError> + Send + Sync + 'static,
    {
        let id = MiddlewareId::new(id);
        self.insert(Arc::new(transform), |state| {
            match state.find_active(id.as_str()) {
                Some(_) => Err(MiddlewareError::DuplicateId { id: id.to_string() }),
                None => Ok(id),
            }
        })
    }

    /// Вставка и анонс. `pick` выбирает id под блокировкой состояния.
    fn insert<E, P>(
        &self,
        transform: TransformFn<T>,
        pick: P,
    ) -> Result<MiddlewareId, E>
    where
        P: FnOnce(&PipelineState<T>) -> Result<MiddlewareId, E>,
    {
        let _announce = self.inner.announce.lock();
        let (entry, changes) = {
            let mut state = self.inner.state.write();
            let id = pick(&state)?;
            let entry = MiddlewareEntry {
                id,
                slot: state.entries.len(),
                generation: state.generation,
                transform,
            };
            state.entries.push(entry.clone());
            (entry, state.changes.clone())
        };

        trace!(middleware = %entry.id, slot = entry.slot, "Middleware added");
        let id = entry.id.clone();
        // анонс вне блокировки состояния: подписчики list() могут звать pipeline
        changes.next(entry);
        Ok(id)
    }

    /// Мягко удаляет активную запись с данным id.
    /// Уже идущие вычисления `transform` не затрагиваются.
    pub fn remove(
        &self,
        id: &str,
    ) -> bool {
        let mut state = self.inner.state.write();
        match state.find_active(id) {
            Some(slot) => {
                state.tombstones.insert(slot);
                debug!(middleware = id, "Middleware removed");
                true
            }
            None => false,
        }
    }

    /// Сбрасывает конвейер в пустое состояние.
    /// Старые подписки `list()` остаются на прежнем потоке и больше ничего
    /// не получают.
    pub fn clear(&self) {
        let _announce = self.inner.announce.lock();
        let mut state = self.inner.state.write();
        let generation = state.generation + 1;
        *state = PipelineState::empty(generation);
        debug!(generation, "Middleware pipeline cleared");
    }

    /// Живой поток активных записей: сначала уже добавленные, потом новые.
    /// Удалённые записи отфильтровываются в момент доставки.
    pub fn list(&self) -> impl Observable<MiddlewareEntry<T>> {
        let changes = self.inner.state.read().changes.clone();
        let inner = self.inner.clone();
        changes.filter(move |entry| inner.state.read().is_active(entry))
    }

    /// Снимок id активных записей в порядке применения.
    pub fn active_ids(&self) -> Vec<MiddlewareId> {
        self.inner
            .state
            .read()
            .active()
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().active().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Синхронная свёртка значения через активные записи.
    ///
    /// Набор записей фиксируется снимком в момент вызова: `add`/`remove`
    /// во время свёртки на неё не влияют. Пустой конвейер возвращает
    /// значение без изменений.
    pub fn apply(
        &self,
        value: T,
    ) -> Result<T, StackError> {
        let snapshot: Vec<MiddlewareEntry<T>> =
            self.inner.state.read().active().cloned().collect();
        snapshot
            .iter()
            .try_fold(value, |acc, entry| entry.apply(acc))
    }

    /// Поток ровно с одним итогом свёртки.
    ///
    /// Итог отдаётся один раз, даже если за время вычисления набор записей
    /// менялся. Ошибка трансформации приходит в `on_error` этого потока и
    /// не влияет на следующие вызовы.
    pub fn transform(
        &self,
        value: T,
    ) -> AsyncSubject<T> {
        match self.apply(value) {
            Ok(v) => AsyncSubject::resolved(v),
            Err(err) => AsyncSubject::failed(err),
        }
    }
}

impl<T: Item> Default for MiddlewarePipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MiddlewarePipeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for MiddlewarePipeline<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("MiddlewarePipeline")
            .field("entries", &state.entries.len())
            .field("tombstones", &state.tombstones.len())
            .field("generation", &state.generation)
            .finish()
    }
}
