use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use topicbus_error::StackError;

use super::{observers::ObserverList, Item, Observable, Observer, Subscriber, Subscription};

/// Чем закончился завершаемый поток.
#[derive(Debug, Clone)]
pub(crate) enum Terminal {
    Completed,
    Errored(StackError),
}

impl Terminal {
    pub(crate) fn deliver<T: 'static>(
        &self,
        subscriber: &Subscriber<T>,
    ) {
        match self {
            Terminal::Completed => subscriber.emit_complete(),
            Terminal::Errored(err) => subscriber.emit_error(err.clone()),
        }
    }
}

/// Обычный мультикаст subject со стандартной семантикой завершения.
///
/// После `complete`/`error` подписчики отключаются, дальнейшие сигналы
/// игнорируются, а поздний подписчик сразу получает терминальный сигнал.
/// Подходит как поток ответов, когда отвечающая сторона шлёт несколько
/// значений.
pub struct PlainSubject<T> {
    observers: Arc<ObserverList<T>>,
    terminal: Arc<Mutex<Option<Terminal>>>,
}

impl<T: Item> PlainSubject<T> {
    pub fn new() -> Self {
        Self {
            observers: ObserverList::new(),
            terminal: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.terminal.lock().is_some()
    }

    fn stop(
        &self,
        terminal: Terminal,
    ) {
        let _gate = self.observers.gate();
        {
            let mut state = self.terminal.lock();
            if state.is_some() {
                return;
            }
            *state = Some(terminal.clone());
        }
        for subscriber in self.observers.drain() {
            terminal.deliver(&subscriber);
        }
    }
}

impl<T: Item> Default for PlainSubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PlainSubject<T> {
    fn clone(&self) -> Self {
        Self {
            observers: self.observers.clone(),
            terminal: self.terminal.clone(),
        }
    }
}

impl<T> fmt::Debug for PlainSubject<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PlainSubject")
            .field("terminal", &*self.terminal.lock())
            .finish()
    }
}

impl<T: Item> Observer<T> for PlainSubject<T> {
    fn next(
        &self,
        value: T,
    ) {
        let _gate = self.observers.gate();
        if self.is_stopped() {
            return;
        }
        for subscriber in self.observers.snapshot() {
            subscriber.emit_next(value.clone());
        }
    }

    fn error(
        &self,
        err: StackError,
    ) {
        self.stop(Terminal::Errored(err));
    }

    fn complete(&self) {
        self.stop(Terminal::Completed);
    }
}

impl<T: Item> Observable<T> for PlainSubject<T> {
    fn subscribe(
        &self,
        subscriber: Subscriber<T>,
    ) -> Subscription {
        let _gate = self.observers.gate();
        let terminal = self.terminal.lock().clone();
        match terminal {
            Some(terminal) => {
                terminal.deliver(&subscriber);
                Subscription::closed()
            }
            None => self.observers.add(subscriber),
        }
    }
}
