use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BotError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// A closed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub profit_pct: f64,
}

/// Whether the engine currently holds its asset
///
/// Only moves Idle -> Open -> Idle. It is updated from the engine's own
/// successful orders and never re-derived from exchange queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PositionState {
    #[default]
    Idle,
    Open(OpenPosition),
}

impl PositionState {
    pub fn is_open(&self) -> bool {
        matches!(self, PositionState::Open(_))
    }

    pub fn entry_price(&self) -> Option<Decimal> {
        match self {
            PositionState::Open(p) => Some(p.entry_price),
            PositionState::Idle => None,
        }
    }

    pub fn quantity(&self) -> Option<Decimal> {
        match self {
            PositionState::Open(p) => Some(p.quantity),
            PositionState::Idle => None,
        }
    }

    /// Idle -> Open. Fails if a position is already open.
    pub fn open(&mut self, entry_price: Decimal, quantity: Decimal) -> Result<()> {
        if self.is_open() {
            return Err(BotError::InvalidTransition("position already open"));
        }
        *self = PositionState::Open(OpenPosition {
            entry_price,
            quantity,
            opened_at: Utc::now(),
        });
        Ok(())
    }

    /// Open -> Idle, returning the realized trade
    pub fn close(&mut self, exit_price: Decimal) -> Result<ClosedTrade> {
        let PositionState::Open(position) = std::mem::take(self) else {
            return Err(BotError::InvalidTransition("no open position"));
        };

        Ok(ClosedTrade {
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            profit_pct: profit_pct(position.entry_price, exit_price),
        })
    }
}

/// `(exit - entry) / entry * 100`
pub fn profit_pct(entry_price: Decimal, exit_price: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;

    if entry_price.is_zero() {
        return 0.0;
    }
    ((exit_price - entry_price) / entry_price * Decimal::ONE_HUNDRED)
        .to_f64()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_then_close() {
        let mut state = PositionState::default();
        assert!(!state.is_open());

        state.open(dec!(100), dec!(0.5)).unwrap();
        assert!(state.is_open());
        assert_eq!(state.entry_price(), Some(dec!(100)));
        assert_eq!(state.quantity(), Some(dec!(0.5)));

        let trade = state.close(dec!(110)).unwrap();
        assert!(!state.is_open());
        assert_eq!(trade.quantity, dec!(0.5));
        assert!((trade.profit_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_double_open_rejected() {
        let mut state = PositionState::default();
        state.open(dec!(100), dec!(1)).unwrap();

        assert!(state.open(dec!(105), dec!(1)).is_err());
        // Original position untouched
        assert_eq!(state.entry_price(), Some(dec!(100)));
    }

    #[test]
    fn test_close_when_idle_rejected() {
        let mut state = PositionState::default();
        assert!(state.close(dec!(100)).is_err());
        assert_eq!(state, PositionState::Idle);
    }

    #[test]
    fn test_profit_pct_loss() {
        let pct = profit_pct(dec!(200), dec!(150));
        assert!((pct + 25.0).abs() < 1e-9);
        assert_eq!(profit_pct(dec!(0), dec!(10)), 0.0);
    }
}
