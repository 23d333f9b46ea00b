use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::Exchange;
use crate::error::BotError;
use crate::feed::PriceCache;
use crate::models::{AssetBalance, Candle, ExchangeFilters, OrderFill, Side, SymbolId};
use crate::Result;

/// Dry-run exchange: market orders fill at the cached feed price
///
/// Market data, balances and listen keys come from the wrapped exchange.
pub struct PaperExchange {
    inner: Arc<dyn Exchange>,
    cache: PriceCache,
    next_order_id: AtomicU64,
    fills: Mutex<HashMap<String, OrderFill>>,
}

impl PaperExchange {
    pub fn new(inner: Arc<dyn Exchange>, cache: PriceCache) -> Self {
        Self {
            inner,
            cache,
            next_order_id: AtomicU64::new(1),
            fills: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn klines(&self, symbol: &SymbolId, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        self.inner.klines(symbol, interval, limit).await
    }

    async fn balances(&self) -> Result<Vec<AssetBalance>> {
        self.inner.balances().await
    }

    async fn filters(&self, symbol: &SymbolId) -> Result<ExchangeFilters> {
        self.inner.filters(symbol).await
    }

    async fn market_order(
        &self,
        symbol: &SymbolId,
        side: Side,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<OrderFill> {
        let price = self
            .cache
            .latest_price(symbol)
            .ok_or_else(|| BotError::DataUnavailable(format!("no cached price for {}", symbol)))?;
        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            price = %price,
            "🧪 [DRY RUN] Simulated market order"
        );

        let fill = OrderFill {
            symbol: symbol.clone(),
            side,
            order_id,
            client_order_id: client_order_id.to_string(),
            executed_qty: quantity,
            avg_price: Some(price),
            status: "FILLED".to_string(),
        };
        self.fills.lock().insert(client_order_id.to_string(), fill.clone());
        Ok(fill)
    }

    async fn find_order(&self, _symbol: &SymbolId, client_order_id: &str) -> Result<Option<OrderFill>> {
        Ok(self.fills.lock().get(client_order_id).cloned())
    }

    async fn create_listen_key(&self) -> Result<String> {
        self.inner.create_listen_key().await
    }

    async fn keepalive_listen_key(&self, listen_key: &str) -> Result<()> {
        self.inner.keepalive_listen_key(listen_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct NoOrders;

    #[async_trait]
    impl Exchange for NoOrders {
        async fn klines(&self, _: &SymbolId, _: &str, _: u32) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }
        async fn balances(&self) -> Result<Vec<AssetBalance>> {
            Ok(vec![AssetBalance {
                asset: "USDC".to_string(),
                free: dec!(250),
                locked: Decimal::ZERO,
            }])
        }
        async fn filters(&self, _: &SymbolId) -> Result<ExchangeFilters> {
            Err(BotError::DataUnavailable("none".to_string()))
        }
        async fn market_order(&self, _: &SymbolId, _: Side, _: Decimal, _: &str) -> Result<OrderFill> {
            panic!("paper exchange must not forward orders");
        }
        async fn find_order(&self, _: &SymbolId, _: &str) -> Result<Option<OrderFill>> {
            panic!("paper exchange must not forward order lookups");
        }
        async fn create_listen_key(&self) -> Result<String> {
            Ok("key".to_string())
        }
        async fn keepalive_listen_key(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fills_at_cached_price() {
        let cache = PriceCache::new();
        let symbol = SymbolId::parse("ETHUSDC").unwrap();
        cache.update(&symbol, dec!(2500.5));

        let paper = PaperExchange::new(Arc::new(NoOrders), cache);
        let first = paper.market_order(&symbol, Side::Buy, dec!(0.1), "mb-a").await.unwrap();
        let second = paper.market_order(&symbol, Side::Sell, dec!(0.1), "mb-b").await.unwrap();

        assert_eq!(first.avg_price, Some(dec!(2500.5)));
        assert_eq!(first.executed_qty, dec!(0.1));
        assert_ne!(first.order_id, second.order_id);

        assert_eq!(paper.find_order(&symbol, "mb-a").await.unwrap(), Some(first));
        assert_eq!(paper.find_order(&symbol, "mb-c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_price_no_fill() {
        let paper = PaperExchange::new(Arc::new(NoOrders), PriceCache::new());
        let symbol = SymbolId::parse("ETHUSDC").unwrap();
        let err = paper.market_order(&symbol, Side::Buy, dec!(1), "mb-z").await.unwrap_err();
        assert!(matches!(err, BotError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_balances_delegate() {
        let paper = PaperExchange::new(Arc::new(NoOrders), PriceCache::new());
        assert_eq!(paper.free_balance("USDC").await.unwrap(), Some(dec!(250)));
    }
}
