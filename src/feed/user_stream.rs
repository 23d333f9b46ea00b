use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, timeout, Duration, Instant, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};

use crate::api::Exchange;
use crate::config::FeedSettings;
use crate::error::BotError;
use crate::execution::RetryPolicy;
use crate::notify::{messages, Notifier};
use crate::Result;

/// Order update pushed on the user-data stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    /// Order status (`NEW`, `PARTIALLY_FILLED`, `FILLED`, ...)
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    /// Limit price; zero for market orders
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "L", default)]
    pub last_price: Option<Decimal>,
}

impl ExecutionReport {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }

    /// Price worth showing: the order price, or the last fill price for market orders
    pub fn display_price(&self) -> Decimal {
        match self.last_price {
            Some(last) if self.price.is_zero() => last,
            _ => self.price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserEvent {
    #[serde(rename = "e")]
    event_type: String,
}

/// Parse an `executionReport` frame; other user events yield `None`
pub fn parse_execution_report(text: &str) -> Option<ExecutionReport> {
    let event: UserEvent = serde_json::from_str(text).ok()?;
    if event.event_type != "executionReport" {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!(target: "multibot::orders", "Malformed executionReport: {}", e);
            None
        }
    }
}

/// Authenticated order-update stream
///
/// Only observes fills (notification + log); engine position state is
/// driven by the engine's own order responses.
pub struct UserDataStream {
    ws_url: String,
    settings: FeedSettings,
    exchange: Arc<dyn Exchange>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl UserDataStream {
    pub fn new(
        ws_url: impl Into<String>,
        settings: FeedSettings,
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            settings,
            exchange,
            notifier,
            retry,
        }
    }

    /// Same reconnect discipline as the market stream: fixed delay, forever
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let reconnect_delay = Duration::from_secs(self.settings.reconnect_delay_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_connection(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(
                        target: "multibot::orders",
                        "User stream dropped: {}. Reconnecting in {:?}",
                        e,
                        reconnect_delay
                    );
                }
            }

            tokio::select! {
                _ = sleep(reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(target: "multibot::orders", "User stream stopped");
    }

    async fn run_connection(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let exchange = self.exchange.clone();
        let listen_key = self
            .retry
            .run("create listen key", || {
                let exchange = exchange.clone();
                async move { exchange.create_listen_key().await }
            })
            .await?;

        let url = format!("{}/{}", self.ws_url.trim_end_matches('/'), listen_key);
        let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let (ws_stream, _response) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| BotError::Timeout)??;

        tracing::info!(target: "multibot::orders", "🔌 User stream connected");

        let (mut write, mut read) = ws_stream.split();

        let period = Duration::from_secs(self.settings.listen_key_keepalive_secs.max(1));
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(report) = parse_execution_report(&text) {
                                self.handle_report(report).await;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(target: "multibot::orders", "User stream closed by server: {:?}", frame);
                            return Err(WsError::ConnectionClosed.into());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(WsError::ConnectionClosed.into()),
                    }
                }
                _ = keepalive.tick() => {
                    match self.keepalive(&listen_key).await {
                        Ok(()) => tracing::debug!(target: "multibot::orders", "Listen key refreshed"),
                        Err(e) => tracing::warn!(target: "multibot::orders", "Listen key keepalive failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    async fn keepalive(&self, listen_key: &str) -> Result<()> {
        let exchange = &self.exchange;
        self.retry
            .run("keepalive listen key", || exchange.keepalive_listen_key(listen_key))
            .await
    }

    async fn handle_report(&self, report: ExecutionReport) {
        if !report.is_filled() {
            tracing::debug!(
                target: "multibot::orders",
                symbol = %report.symbol,
                status = %report.status,
                "Order update"
            );
            return;
        }

        tracing::info!(
            target: "multibot::orders",
            symbol = %report.symbol,
            side = %report.side,
            quantity = %report.quantity,
            price = %report.display_price(),
            status = %report.status,
            "✅ Order filled"
        );
        self.notifier.send(&messages::order_filled(&report)).await;
    }
}
