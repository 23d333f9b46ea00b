use rust_decimal::prelude::*;
use std::sync::Arc;

use super::RetryPolicy;
use crate::api::Exchange;
use crate::config::RiskParams;
use crate::models::{ExchangeFilters, Side, SymbolId};

/// Round `quantity` down to a whole number of `step`s
pub fn quantize_down(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    (quantity / step).floor() * step
}

/// Render a quantity for order submission: at most 8 decimals, no trailing zeros
pub fn format_quantity(quantity: Decimal) -> String {
    quantity
        .round_dp_with_strategy(8, RoundingStrategy::ToZero)
        .normalize()
        .to_string()
}

/// Quantity before any exchange constraint is applied
///
/// `risk_fraction * balance / price`, or `risk_fraction * balance /
/// (volatility * price)` when a positive volatility distance is given.
pub fn raw_quantity(
    balance: Decimal,
    risk_fraction: Decimal,
    price: Decimal,
    volatility: Option<Decimal>,
) -> Decimal {
    if price <= Decimal::ZERO || balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let risk_amount = balance * risk_fraction;
    match volatility {
        Some(distance) if distance > Decimal::ZERO => risk_amount / (distance * price),
        _ => risk_amount / price,
    }
}

/// Fit a raw quantity to the symbol's lot and notional filters
///
/// The result is either zero ("do not trade") or a multiple of `step_size`
/// inside `[min_qty, max_qty]` whose notional meets `min_notional`.
pub fn fit_to_filters(raw: Decimal, price: Decimal, filters: &ExchangeFilters) -> Decimal {
    if price <= Decimal::ZERO || raw <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let step = filters.step_size;
    let mut quantity = quantize_down(raw, step);

    if quantity.is_zero() || quantity < filters.min_qty {
        tracing::debug!("Quantity {} below minimum {}", quantity, filters.min_qty);
        return Decimal::ZERO;
    }

    if let Some(min_notional) = filters.min_notional {
        if quantity * price < min_notional {
            let bumped = quantize_down(min_notional / price, step);
            if bumped < filters.min_qty || bumped * price < min_notional {
                tracing::debug!(
                    "Cannot reach min notional {} at price {} (best {})",
                    min_notional,
                    price,
                    bumped
                );
                return Decimal::ZERO;
            }
            tracing::debug!("Quantity {} raised to {} for min notional", quantity, bumped);
            quantity = bumped;
        }
    }

    if quantity > filters.max_qty {
        quantity = quantize_down(filters.max_qty, step);
        let below_notional = filters
            .min_notional
            .is_some_and(|min_notional| quantity * price < min_notional);
        if quantity < filters.min_qty || below_notional {
            return Decimal::ZERO;
        }
    }

    quantity
}

/// Full sizing pipeline given already-fetched inputs
///
/// Missing balance or filter data yields zero, never an error.
pub fn size_order(
    side: Side,
    symbol: &SymbolId,
    price: Decimal,
    volatility: Option<Decimal>,
    balance: Option<Decimal>,
    filters: Option<&ExchangeFilters>,
    risk: &RiskParams,
) -> Decimal {
    let (Some(balance), Some(filters)) = (balance, filters) else {
        return Decimal::ZERO;
    };

    let fraction = match side {
        Side::Buy => risk.fraction_for(symbol.quote_asset()),
        Side::Sell => risk.risk_percent,
    };

    let raw = raw_quantity(balance, fraction, price, volatility);
    fit_to_filters(raw, price, filters)
}

/// Asset whose free balance funds an order on `side`
pub fn funding_asset(side: Side, symbol: &SymbolId) -> String {
    match side {
        Side::Buy => symbol.quote_asset().to_string(),
        Side::Sell => symbol.base_asset(),
    }
}

/// Order sizing against live balances
pub struct MoneyManager {
    exchange: Arc<dyn Exchange>,
    retry: RetryPolicy,
}

impl MoneyManager {
    pub fn new(exchange: Arc<dyn Exchange>, retry: RetryPolicy) -> Self {
        Self { exchange, retry }
    }

    /// `size(side, symbol, price, volatility?) -> quantity`
    pub async fn size(
        &self,
        side: Side,
        symbol: &SymbolId,
        price: Decimal,
        volatility: Option<Decimal>,
        filters: Option<&ExchangeFilters>,
        risk: &RiskParams,
    ) -> Decimal {
        let asset = funding_asset(side, symbol);
        let exchange = self.exchange.clone();

        let balance = match self
            .retry
            .run("free balance", || {
                let exchange = exchange.clone();
                let asset = asset.clone();
                async move { exchange.free_balance(&asset).await }
            })
            .await
        {
            Ok(Some(balance)) => Some(balance),
            Ok(None) => {
                tracing::warn!(symbol = %symbol, "No {} balance found", asset);
                None
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Balance lookup failed: {}", e);
                None
            }
        };

        let quantity = size_order(side, symbol, price, volatility, balance, filters, risk);
        tracing::debug!(
            symbol = %symbol,
            side = %side,
            quantity = %quantity,
            "Order sized"
        );
        quantity
    }
}
