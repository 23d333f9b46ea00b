//! Text rendered for operator notifications

use rust_decimal::Decimal;

use crate::feed::ExecutionReport;
use crate::models::{Side, SymbolId};

pub fn startup(bot_name: &str, symbols: &[SymbolId]) -> String {
    let mut message = format!("🚀 *{} started!*\nMonitored pairs:", bot_name);
    for symbol in symbols {
        message.push_str(&format!("\n🔹 {}", symbol));
    }
    message
}

pub fn feed_started() -> String {
    "📡 Binance WebSocket started. Monitoring in progress...".to_string()
}

pub fn trade(
    bot_name: &str,
    side: Side,
    symbol: &SymbolId,
    quantity: Decimal,
    price: Decimal,
    profit_pct: Option<f64>,
) -> String {
    let mut message = format!(
        "📢 *Trade executed by {}*\n🔹 Action: {}\n🔹 Pair: {}\n🔹 Quantity: {}\n🔹 Price: {:.2} {}\n",
        bot_name,
        side,
        symbol,
        quantity.normalize(),
        price,
        symbol.quote_asset()
    );
    if let Some(profit) = profit_pct {
        message.push_str(&format!("💰 Profit: {:.2}%\n", profit));
    }
    message
}

pub fn critical(bot_name: &str, detail: &str) -> String {
    format!("❌ CRITICAL ERROR in {}\n{}", bot_name, detail)
}

pub fn order_filled(report: &ExecutionReport) -> String {
    format!(
        "{} {} FILLED! Quantity: {}, Price: {}",
        report.side,
        report.symbol,
        report.quantity.normalize(),
        report.display_price().normalize()
    )
}
