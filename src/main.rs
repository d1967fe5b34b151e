//! Демо шины topicbus
//!
//! Поднимает шину по настройкам, подписывается на заказы по шаблону,
//! публикует несколько событий через middleware и выполняет запрос с
//! таймаутом.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use topicbus::{
    first_value, init_logging, Bus, Envelope, Observable, RequestError, Settings, Subscriber,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Аргументы демо
#[derive(Parser)]
#[command(name = "topicbus-demo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "topicbus demo - in-process pub/sub walkthrough", long_about = None)]
struct Cli {
    /// Файл настроек (TOML)
    #[arg(short, long, env = "TOPICBUS_CONFIG", help = "Путь к TOML-файлу настроек")]
    config: Option<PathBuf>,
    /// Сколько заказов опубликовать
    #[arg(short, long, default_value = "3", help = "Количество публикуемых заказов")]
    orders: u32,
    /// Таймаут ожидания ответа в миллисекундах
    #[arg(long, default_value = "250", help = "Таймаут ожидания ответа, мс")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(cli.config.as_deref()).context("loading settings")?;
    let logging = init_logging(settings.logging.clone()).context("initializing logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("GIT_COMMIT"),
        build_time = env!("BUILD_TIME"),
        default_channel = %settings.default_channel,
        "Starting topicbus demo"
    );

    run(&cli, Bus::with_options(settings.bus_options())).await?;

    logging.shutdown_async().await;
    Ok(())
}

async fn run(
    cli: &Cli,
    bus: Bus<Value>,
) -> Result<()> {
    let orders = bus.default_channel();

    // Каждый заказ получает идентификатор трассировки
    let created = orders.topic("orders.created")?;
    created.middleware().add(|mut order: Value| {
        if let Some(map) = order.as_object_mut() {
            map.insert("trace_id".to_string(), json!(Uuid::new_v4().to_string()));
        }
        Ok(order)
    });

    let audit = bus.subscribe(
        "orders.#",
        Subscriber::new(|envelope: Envelope<Value>| {
            info!(payload = %envelope.data(), request = envelope.is_request(), "Order event");
        })
        .on_error(|err| warn!(error = %err, "Order stream error")),
    )?;

    for id in 0..cli.orders {
        bus.publish("orders.created", json!({ "id": id, "amount": 10 * (id + 1) }))?;
    }
    bus.publish("orders.cancelled", json!({ "id": 0 }))?;

    // Отвечающая сторона: цена со скидкой
    let quotes = orders.topic("pricing.quote")?;
    quotes
        .reply_middleware()
        .add(|quote: Value| Ok(json!({ "quote": quote, "currency": "EUR" })));
    let responder = quotes.subscribe(Subscriber::new(|envelope: Envelope<Value>| {
        if let Some(request) = envelope.as_request() {
            let amount = request.data()["amount"].as_f64().unwrap_or_default();
            request.respond(json!(amount * 0.9));
        }
    }));

    let timeout = Duration::from_millis(cli.timeout_ms);
    let reply = bus.request("pricing.quote", json!({ "amount": 200 }))?;
    match tokio::time::timeout(timeout, first_value(&reply)).await {
        Ok(Ok(Some(quote))) => info!(%quote, "Quote received"),
        Ok(Ok(None)) => warn!("Quote stream completed without a value"),
        Ok(Err(err)) => warn!(error = %err, "Quote request failed"),
        Err(_) => {
            let err = RequestError::Timeout {
                topic: "pricing.quote".to_string(),
                millis: cli.timeout_ms,
            };
            warn!(error = %err, "Quote request timed out")
        }
    }

    // Никто не слушает: ответа не будет, спасает только таймаут
    let silent = bus.request("pricing.refund", json!({ "amount": 5 }))?;
    if tokio::time::timeout(timeout, first_value(&silent)).await.is_err() {
        info!(timeout_ms = cli.timeout_ms, "Unroutable request timed out as expected");
    }

    audit.unsubscribe();
    responder.unsubscribe();
    info!(topics = ?orders.topic_names(), "Demo finished");
    Ok(())
}
