use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, sleep, timeout, Duration, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};

use super::cache::PriceCache;
use super::subscription::{StreamRequest, SubscriptionSet, INITIAL_SUBSCRIBE_ID};
use crate::config::{ConfigStore, FeedSettings};
use crate::error::BotError;
use crate::models::SymbolId;
use crate::notify::{messages, Notifier};
use crate::Result;

/// 24h rolling ticker event (`<symbol>@ticker`)
#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "s")]
    symbol: String,
    /// Last price
    #[serde(rename = "c")]
    close: String,
}

/// Extract `(symbol, last price)` from a ticker frame
///
/// Subscription acks (`{"result":null,"id":1}`) and other events yield `None`.
pub fn parse_ticker(text: &str) -> Option<(SymbolId, Decimal)> {
    let event: TickerEvent = serde_json::from_str(text).ok()?;
    let symbol = SymbolId::parse(&event.symbol).ok()?;
    match event.close.parse::<Decimal>() {
        Ok(price) => Some((symbol, price)),
        Err(e) => {
            tracing::warn!("Bad ticker price '{}' for {}: {}", event.close, symbol, e);
            None
        }
    }
}

/// The single shared market-data connection
///
/// Keeps one ticker stream open for every configured symbol. Symbol-set
/// changes are applied as incremental SUBSCRIBE/UNSUBSCRIBE frames on the
/// live connection; the connection itself is only reopened after a drop.
pub struct MarketDataFeed {
    ws_url: String,
    settings: FeedSettings,
    config: Arc<ConfigStore>,
    cache: PriceCache,
    notifier: Arc<dyn Notifier>,
    subscriptions: Mutex<SubscriptionSet>,
    reconcile_now: Notify,
    started_announced: AtomicBool,
}

impl MarketDataFeed {
    pub fn new(
        ws_url: impl Into<String>,
        settings: FeedSettings,
        config: Arc<ConfigStore>,
        cache: PriceCache,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            settings,
            config,
            cache,
            notifier,
            subscriptions: Mutex::new(SubscriptionSet::new()),
            reconcile_now: Notify::new(),
            started_announced: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Symbols currently subscribed on the wire
    pub fn subscribed(&self) -> Vec<SymbolId> {
        self.subscriptions.lock().symbols().cloned().collect()
    }

    /// Ask the running connection to diff against config right away
    pub fn request_reconcile(&self) {
        self.reconcile_now.notify_one();
    }

    /// Connect/resubscribe loop. Retries forever until shutdown.
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
                        target: "multibot::feed",
                        "Market stream dropped: {}. Reconnecting in {:?}",
                        e,
                        reconnect_delay
                    );
                }
            }

            self.subscriptions.lock().clear();

            tokio::select! {
                _ = sleep(reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!(target: "multibot::feed", "Market stream stopped");
    }

    /// One connection lifetime. `Ok` only on shutdown.
    async fn run_connection(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let (ws_stream, _response) = timeout(connect_timeout, connect_async(self.ws_url.as_str()))
            .await
            .map_err(|_| BotError::Timeout)??;

        tracing::info!(target: "multibot::feed", "🔌 Market stream connected to {}", self.ws_url);

        let (mut write, mut read) = ws_stream.split();

        let desired = self.config.symbols();
        if !desired.is_empty() {
            send_frame(&mut write, &StreamRequest::subscribe(&desired, INITIAL_SUBSCRIBE_ID)).await?;
        }
        self.subscriptions.lock().reset(&desired);
        tracing::info!(
            target: "multibot::feed",
            count = desired.len(),
            "Subscribed to ticker streams"
        );

        if !self.started_announced.swap(true, Ordering::SeqCst) {
            self.notifier.send(&messages::feed_started()).await;
        }

        let mut reconcile_tick = interval(Duration::from_secs(self.settings.reconcile_interval_secs.max(1)));
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.reconcile(&mut write).await?;
                            self.handle_text(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(target: "multibot::feed", "Market stream closed by server: {:?}", frame);
                            return Err(WsError::ConnectionClosed.into());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(WsError::ConnectionClosed.into()),
                    }
                }
                _ = reconcile_tick.tick() => {
                    self.reconcile(&mut write).await?;
                }
                _ = self.reconcile_now.notified() => {
                    self.reconcile(&mut write).await?;
                }
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Send only the delta between the subscribed and configured sets
    async fn reconcile<S>(&self, write: &mut S) -> Result<()>
    where
        S: Sink<Message, Error = WsError> + Unpin,
    {
        let desired = self.config.symbols();
        let delta = self.subscriptions.lock().diff(&desired);
        if delta.is_empty() {
            return Ok(());
        }

        for frame in StreamRequest::for_delta(&delta) {
            send_frame(write, &frame).await?;
        }

        for symbol in &delta.unsubscribe {
            self.cache.remove(symbol);
        }
        self.subscriptions.lock().apply(&delta);

        tracing::info!(
            target: "multibot::feed",
            subscribed = ?delta.subscribe,
            unsubscribed = ?delta.unsubscribe,
            "Subscriptions reconciled"
        );
        Ok(())
    }

    fn handle_text(&self, text: &str) {
        let Some((symbol, price)) = parse_ticker(text) else {
            tracing::trace!(target: "multibot::feed", "Ignoring frame: {}", text);
            return;
        };

        if !self.subscriptions.lock().contains(&symbol) {
            return;
        }

        if self.cache.update(&symbol, price) {
            tracing::debug!(target: "multibot::feed", symbol = %symbol, price = %price, "Price updated");
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: &StreamRequest) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let msg = serde_json::to_string(frame)?;
    write.send(Message::Text(msg.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolSettings;
    use crate::notify::RecordingNotifier;
    use rust_decimal_macros::dec;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_parse_ticker() {
        let text = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"64123.45","o":"63000.00"}"#;
        let (symbol, price) = parse_ticker(text).unwrap();
        assert_eq!(symbol.as_str(), "BTCUSDT");
        assert_eq!(price, dec!(64123.45));
    }

    #[test]
    fn test_parse_ticker_ignores_acks() {
        assert!(parse_ticker(r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_ticker("not json").is_none());
        assert!(parse_ticker(r#"{"s":"BTCUSDT","c":"abc"}"#).is_none());
    }

    fn test_settings() -> FeedSettings {
        FeedSettings {
            reconnect_delay_secs: 1,
            reconcile_interval_secs: 3600,
            connect_timeout_secs: 5,
            listen_key_keepalive_secs: 1800,
        }
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_feed_subscribes_caches_and_reconciles() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(
            ConfigStore::open(
                dir.path().join("dynamic_config.json"),
                SymbolSettings::default(),
                vec![SymbolId::parse("BTCUSDT").unwrap(), SymbolId::parse("ETHUSDT").unwrap()],
            )
            .unwrap(),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let feed = Arc::new(MarketDataFeed::new(
            format!("ws://{addr}"),
            test_settings(),
            store.clone(),
            PriceCache::new(),
            notifier.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(feed.clone().run(shutdown_rx));

        let (tcp, _) = listener.accept().await.unwrap();
        let mut server = accept_async(tcp).await.unwrap();

        let first = next_json(&mut server).await;
        assert_eq!(first["method"], "SUBSCRIBE");
        assert_eq!(first["id"], 1);
        assert_eq!(first["params"].as_array().unwrap().len(), 2);

        server
            .send(Message::Text(r#"{"s":"BTCUSDT","c":"64000.5"}"#.to_string().into()))
            .await
            .unwrap();

        // Symbol-set change: ETH stays, BTC goes, SOL arrives
        store.remove_symbol(&SymbolId::parse("BTCUSDT").unwrap()).unwrap();
        store.add_symbol(SymbolId::parse("SOLUSDT").unwrap()).unwrap();
        feed.request_reconcile();

        let sub = next_json(&mut server).await;
        assert_eq!(sub["method"], "SUBSCRIBE");
        assert_eq!(sub["id"], 100);
        assert_eq!(sub["params"], serde_json::json!(["solusdt@ticker"]));

        let unsub = next_json(&mut server).await;
        assert_eq!(unsub["method"], "UNSUBSCRIBE");
        assert_eq!(unsub["id"], 200);
        assert_eq!(unsub["params"], serde_json::json!(["btcusdt@ticker"]));

        server
            .send(Message::Text(r#"{"s":"SOLUSDT","c":"145.2"}"#.to_string().into()))
            .await
            .unwrap();

        let sol = SymbolId::parse("SOLUSDT").unwrap();
        for _ in 0..50 {
            if feed.cache().latest_price(&sol).is_some() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(feed.cache().latest_price(&sol), Some(dec!(145.2)));
        // Unsubscribed symbol dropped from the cache
        assert!(feed.cache().latest_price(&SymbolId::parse("BTCUSDT").unwrap()).is_none());

        let mut subscribed = feed.subscribed();
        subscribed.sort();
        assert_eq!(
            subscribed,
            vec![SymbolId::parse("ETHUSDT").unwrap(), sol.clone()]
        );
        assert_eq!(notifier.messages().len(), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
