use arc_swap::ArcSwap;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{PriceTick, SymbolId};

/// Last-value price cache shared by the feed (writer) and engines (readers)
///
/// ```text
/// Engine ──► latest_price() ──► load() ──► never blocked
/// Feed   ──► update() ──► clone map + insert + store() ──► atomic swap
/// ```
///
/// Only the feed task writes, so copy-on-write never races with itself.
#[derive(Clone, Default)]
pub struct PriceCache {
    prices: Arc<ArcSwap<HashMap<SymbolId, PriceTick>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_price(&self, symbol: &SymbolId) -> Option<Decimal> {
        self.prices.load().get(symbol).map(|tick| tick.price)
    }

    pub fn latest_tick(&self, symbol: &SymbolId) -> Option<PriceTick> {
        self.prices.load().get(symbol).cloned()
    }

    /// Store a new price. Returns false (and changes nothing) when the
    /// price equals the cached one.
    pub fn update(&self, symbol: &SymbolId, price: Decimal) -> bool {
        let current = self.prices.load();
        if current.get(symbol).is_some_and(|tick| tick.price == price) {
            return false;
        }

        let mut next: HashMap<SymbolId, PriceTick> = (**current).clone();
        next.insert(
            symbol.clone(),
            PriceTick {
                symbol: symbol.clone(),
                price,
                observed_at: Utc::now(),
            },
        );
        self.prices.store(Arc::new(next));
        true
    }

    /// Drop a symbol that is no longer tracked
    pub fn remove(&self, symbol: &SymbolId) {
        let current = self.prices.load();
        if !current.contains_key(symbol) {
            return;
        }
        let mut next: HashMap<SymbolId, PriceTick> = (**current).clone();
        next.remove(symbol);
        self.prices.store(Arc::new(next));
    }

    pub fn len(&self) -> usize {
        self.prices.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.load().is_empty()
    }
}
