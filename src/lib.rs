//! In-process publish/subscribe bus with hierarchical topics, wildcard
//! subscriptions, request/reply and per-topic middleware.
//!
//! Values flow through named [`Topic`]s grouped into [`Channel`]s; a
//! [`Bus`] owns the channels. Topics never complete: a subscriber stays
//! attached until it unsubscribes, whatever errors are broadcast on the
//! topic.

/// Settings loading (`config` crate: defaults, TOML file, environment).
pub mod config;
/// Crate errors: the bus taxonomy and setup errors.
pub mod error;
/// Logging initialization (filter, console and file sinks).
pub mod logging;
/// Topics, channels, middleware, plugins and the bus.
pub mod pubsub;
/// Multicast stream primitives consumed by the bus.
pub mod stream;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use self::config::Settings;
pub use error::{
    BusResult, DeliveryError, LoggingError, MiddlewareError, PatternError, RequestError,
    SettingsError, StackError, StatusCode,
};
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
pub use pubsub::{
    ApplyState, Bus, BusOptions, BusPlugin, Channel, ChannelPlugin, Envelope, MiddlewareId,
    MiddlewarePipeline, MiddlewareSubject, Observation, Registration, ReplyStream, Request,
    Topic, TopicMatcher,
};
pub use stream::{
    first_value, AsyncSubject, EndlessSubject, Observable, ObservableExt, Observer,
    PlainSubject, Subject, Subscriber, Subscription,
};
