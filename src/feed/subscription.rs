use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::SymbolId;

/// Incremental change needed to move from the subscribed set to the desired one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDelta {
    pub subscribe: Vec<SymbolId>,
    pub unsubscribe: Vec<SymbolId>,
}

impl SubscriptionDelta {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Symbols the feed connection is currently subscribed to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    symbols: BTreeSet<SymbolId>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, symbol: &SymbolId) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolId> {
        self.symbols.iter()
    }

    /// `desired \ current` to subscribe, `current \ desired` to unsubscribe
    pub fn diff<'a, I>(&self, desired: I) -> SubscriptionDelta
    where
        I: IntoIterator<Item = &'a SymbolId>,
    {
        let desired: BTreeSet<&SymbolId> = desired.into_iter().collect();
        let current: BTreeSet<&SymbolId> = self.symbols.iter().collect();

        SubscriptionDelta {
            subscribe: desired.difference(&current).map(|s| (*s).clone()).collect(),
            unsubscribe: current.difference(&desired).map(|s| (*s).clone()).collect(),
        }
    }

    /// Record that a delta was sent on the wire
    pub fn apply(&mut self, delta: &SubscriptionDelta) {
        for symbol in &delta.unsubscribe {
            self.symbols.remove(symbol);
        }
        for symbol in &delta.subscribe {
            self.symbols.insert(symbol.clone());
        }
    }

    /// Replace wholesale after a fresh connection
    pub fn reset<'a, I>(&mut self, symbols: I)
    where
        I: IntoIterator<Item = &'a SymbolId>,
    {
        self.symbols = symbols.into_iter().cloned().collect();
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }
}

/// Binance combined-stream control frame
#[derive(Debug, Serialize)]
pub struct StreamRequest {
    pub method: &'static str,
    pub params: Vec<String>,
    pub id: u64,
}

/// Request ids: 1 for the initial subscribe, 100 for incremental
/// subscribes, 200 for unsubscribes
pub const INITIAL_SUBSCRIBE_ID: u64 = 1;
pub const SUBSCRIBE_ID: u64 = 100;
pub const UNSUBSCRIBE_ID: u64 = 200;

impl StreamRequest {
    pub fn subscribe(symbols: &[SymbolId], id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: symbols.iter().map(SymbolId::ticker_stream).collect(),
            id,
        }
    }

    pub fn unsubscribe(symbols: &[SymbolId]) -> Self {
        Self {
            method: "UNSUBSCRIBE",
            params: symbols.iter().map(SymbolId::ticker_stream).collect(),
            id: UNSUBSCRIBE_ID,
        }
    }

    /// Frames to send for a delta, subscribes first
    pub fn for_delta(delta: &SubscriptionDelta) -> Vec<Self> {
        let mut frames = Vec::new();
        if !delta.subscribe.is_empty() {
            frames.push(Self::subscribe(&delta.subscribe, SUBSCRIBE_ID));
        }
        if !delta.unsubscribe.is_empty() {
            frames.push(Self::unsubscribe(&delta.unsubscribe));
        }
        frames
    }
}
