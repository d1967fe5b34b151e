//! Внутрипроцессная шина publish/subscribe.
//!
//! - `matcher`: сопоставление имён топиков с шаблонами (`*`, `#`).
//! - `middleware`: упорядоченный конвейер преобразований значений.
//! - `middleware_subject`: subject, применяющий конвейер перед доставкой.
//! - `topic`: именованный поток с конвертами публикаций и запросов.
//! - `channel`: реестр топиков, подписка по шаблону, request/reply.
//! - `bus`: реестр каналов и расширения шины.
//! - `plugin`: трейты расширений и правило "первое определение побеждает".
//! - `intern` (приватный): интернирование имён топиков.

pub mod bus;
pub mod channel;
mod intern;
pub mod matcher;
pub mod middleware;
pub mod middleware_subject;
pub mod plugin;
pub mod topic;

pub use bus::{Bus, BusOptions};
pub use channel::{Channel, Observation, PatternStream, ReplyStream};
pub use matcher::{is_wildcard, matches, TopicMatcher};
pub use middleware::{MiddlewareEntry, MiddlewareId, MiddlewarePipeline, TransformFn};
pub use middleware_subject::{ApplyFn, ApplyState, MiddlewareSubject};
pub use plugin::{BusPlugin, ChannelPlugin, Registration};
pub use topic::{Envelope, ReplySubject, Request, Topic};
