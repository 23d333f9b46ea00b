use std::collections::BTreeSet;

use rust_decimal::Decimal;

use crate::api::Exchange;
use crate::execution::RetryPolicy;
use crate::models::{AssetBalance, SymbolId};

/// Assets always shown regardless of the tracked pairs
const ALWAYS_MONITORED: [&str; 2] = ["BTC", "USDC"];

const RULE: &str = "----------------------------------";

/// Free/locked balances for the assets of the tracked pairs
pub fn wallet_summary(balances: &[AssetBalance], symbols: &[SymbolId]) -> String {
    let mut monitored: BTreeSet<String> = ALWAYS_MONITORED.iter().map(|a| a.to_string()).collect();
    for symbol in symbols {
        monitored.insert(symbol.base_asset());
        monitored.insert(symbol.quote_asset().to_string());
    }

    let mut message = format!("📊 *Binance Wallet* 📊\n{}\n", RULE);
    let mut has_assets = false;
    for balance in balances {
        if !monitored.contains(&balance.asset) {
            continue;
        }
        if balance.free > Decimal::ZERO || balance.locked > Decimal::ZERO {
            message.push_str(&format!(
                "🔹 {}: Free = {}, Locked = {}\n",
                balance.asset,
                balance.free.normalize(),
                balance.locked.normalize()
            ));
            has_assets = true;
        }
    }
    if !has_assets {
        message.push_str("🚨 No assets available in the wallet!\n");
    }
    message.push_str(RULE);
    message
}

/// Fetch balances and render the summary; failures become the message text
pub async fn fetch_wallet_summary(
    exchange: &dyn Exchange,
    symbols: &[SymbolId],
    retry: &RetryPolicy,
) -> String {
    match retry.run("wallet balances", || exchange.balances()).await {
        Ok(balances) => wallet_summary(&balances, symbols),
        Err(e) => {
            tracing::error!("Wallet fetch failed: {}", e);
            format!("❌ Error fetching wallet: {}", e)
        }
    }
}
