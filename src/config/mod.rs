//! Настройки шины и демо-приложения.

pub mod settings;

pub use settings::Settings;
