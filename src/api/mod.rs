pub mod binance;
pub mod paper;

pub use binance::BinanceClient;
pub use paper::PaperExchange;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{AssetBalance, Candle, ExchangeFilters, OrderFill, Side, SymbolId};
use crate::Result;

/// Fresh `newClientOrderId` (at most 36 characters, as Binance requires)
pub fn new_client_order_id() -> String {
    format!("mb-{}", uuid::Uuid::new_v4().simple())
}

/// Spot exchange operations used by the trading core
///
/// Implementations must apply their own per-request timeout; callers wrap
/// every call in a `RetryPolicy`.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Most recent `limit` candles, oldest first
    async fn klines(&self, symbol: &SymbolId, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    async fn balances(&self) -> Result<Vec<AssetBalance>>;

    /// Free balance of one asset, `None` if the account does not hold it at all
    async fn free_balance(&self, asset: &str) -> Result<Option<Decimal>> {
        let balances = self.balances().await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free))
    }

    async fn filters(&self, symbol: &SymbolId) -> Result<ExchangeFilters>;

    /// Submit a market order under a caller-chosen client order id
    ///
    /// The same id is reused on every retry of one trading decision so a
    /// resend can be told apart from a new order.
    async fn market_order(
        &self,
        symbol: &SymbolId,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<OrderFill>;

    /// Look up an order by client order id; `None` if the exchange never saw it
    async fn find_order(&self, symbol: &SymbolId, client_order_id: &str) -> Result<Option<OrderFill>>;

    async fn create_listen_key(&self) -> Result<String>;

    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()>;
}
