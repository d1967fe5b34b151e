use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use topicbus_error::StackError;

use super::{
    observers::ObserverList, subject::Terminal, Item, Observable, Observer, Subscriber,
    Subscription,
};

/// Single-shot subject: отдаёт последнее полученное значение в момент
/// `complete()` и сразу завершается.
///
/// Поздний подписчик получает то же значение и завершение немедленно.
/// Используется как поток ответа на запрос по умолчанию и как результат
/// [`MiddlewarePipeline::transform`](crate::pubsub::MiddlewarePipeline::transform).
pub struct AsyncSubject<T> {
    observers: Arc<ObserverList<T>>,
    state: Arc<Mutex<AsyncState<T>>>,
}

struct AsyncState<T> {
    value: Option<T>,
    terminal: Option<Terminal>,
}

impl<T: Item> AsyncSubject<T> {
    pub fn new() -> Self {
        Self {
            observers: ObserverList::new(),
            state: Arc::new(Mutex::new(AsyncState {
                value: None,
                terminal: None,
            })),
        }
    }

    /// Уже разрешённый subject.
    pub fn resolved(value: T) -> Self {
        let subject = Self::new();
        subject.next(value);
        subject.complete();
        subject
    }

    /// Subject, завершённый ошибкой.
    pub fn failed(err: StackError) -> Self {
        let subject = Self::new();
        subject.error(err);
        subject
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    /// Итог без подписки: `Some(Ok(..))` после завершения со значением,
    /// `Some(Err(..))` после ошибки, `None` пока subject открыт или
    /// завершился пустым.
    pub fn outcome(&self) -> Option<Result<T, StackError>> {
        let state = self.state.lock();
        match &state.terminal {
            Some(Terminal::Completed) => state.value.clone().map(Ok),
            Some(Terminal::Errored(err)) => Some(Err(err.clone())),
            None => None,
        }
    }
}

impl<T: Item> Default for AsyncSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AsyncSubject<T> {
    fn clone(&self) -> Self {
        Self {
            observers: self.observers.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T> fmt::Debug for AsyncSubject<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AsyncSubject")
            .field("has_value", &state.value.is_some())
            .field("terminal", &state.terminal)
            .finish()
    }
}

impl<T: Item> Observer<T> for AsyncSubject<T> {
    fn next(
        &self,
        value: T,
    ) {
        let mut state = self.state.lock();
        if state.terminal.is_none() {
            state.value = Some(value);
        }
    }

    fn error(
        &self,
        err: StackError,
    ) {
        let _gate = self.observers.gate();
        {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Errored(err.clone()));
        }
        for subscriber in self.observers.drain() {
            subscriber.emit_error(err.clone());
        }
    }

    fn complete(&self) {
        let _gate = self.observers.gate();
        let value = {
            let mut state = self.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(Terminal::Completed);
            state.value.clone()
        };
        for subscriber in self.observers.drain() {
            if let Some(v) = &value {
                subscriber.emit_next(v.clone());
            }
            subscriber.emit_complete();
        }
    }
}

impl<T: Item> Observable<T> for AsyncSubject<T> {
    fn subscribe(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        let _gate = self.observers.gate();
        let (value, terminal) = {
            let state = self.state.lock();
            (state.value.clone(), state.terminal.clone())
        };
        match terminal {
            None => self.observers.add(subscriber),
            Some(Terminal::Completed) => {
                if let Some(v) = value {
                    subscriber.emit_next(v);
                }
                subscriber.emit_complete();
                Subscription::closed()
            }
            Some(terminal) => {
                terminal.deliver(&subscriber);
                Subscription::closed()
            }
        }
    }
}
