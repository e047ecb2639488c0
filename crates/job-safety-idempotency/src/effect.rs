//! Side-effect kinds and deterministic entity ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A category of financial side effect that must happen at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    OrderPlacement,
    PositionUpdate,
    LedgerWrite,
    PnlWrite,
    SignalConsumption,
    BalanceUpdate,
    TradeExecution,
    TradeStateWrite,
    /// Any other effect, named by the caller.
    Custom(String),
}

impl EffectKind {
    /// The name used in coordinator keys and entity-id hashes.
    pub fn as_str(&self) -> &str {
        match self {
            EffectKind::OrderPlacement => "order_placement",
            EffectKind::PositionUpdate => "position_update",
            EffectKind::LedgerWrite => "ledger_write",
            EffectKind::PnlWrite => "pnl_write",
            EffectKind::SignalConsumption => "signal_consumption",
            EffectKind::BalanceUpdate => "balance_update",
            EffectKind::TradeExecution => "trade_execution",
            EffectKind::TradeStateWrite => "trade_state_write",
            EffectKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EffectKind {
    fn from(name: &str) -> Self {
        match name {
            "order_placement" => EffectKind::OrderPlacement,
            "position_update" => EffectKind::PositionUpdate,
            "ledger_write" => EffectKind::LedgerWrite,
            "pnl_write" => EffectKind::PnlWrite,
            "signal_consumption" => EffectKind::SignalConsumption,
            "balance_update" => EffectKind::BalanceUpdate,
            "trade_execution" => EffectKind::TradeExecution,
            "trade_state_write" => EffectKind::TradeStateWrite,
            other => EffectKind::Custom(other.to_string()),
        }
    }
}

/// Derives a deterministic id for one logical side effect.
///
/// Parameters are sorted by name before hashing, so the same operation
/// retried with its parameters in a different order yields the same id.
/// The id is the first 32 hex characters of a SHA-256 digest over the
/// effect name and the sorted parameters, each part prefixed with its byte
/// length (`9:pnl_write|8:trade_id=3:t-1`), so a value containing `|` or
/// `=` cannot pass for another parameter. A repeated parameter name keeps
/// its last value.
///
/// ```rust
/// use job_safety_idempotency::{generate_entity_id, EffectKind};
///
/// let a = generate_entity_id(&EffectKind::LedgerWrite, [("account", "acc-1"), ("entry", "42")]);
/// let b = generate_entity_id(&EffectKind::LedgerWrite, [("entry", "42"), ("account", "acc-1")]);
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 32);
/// ```
pub fn generate_entity_id<I, K, V>(effect: &EffectKind, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: fmt::Display,
{
    let sorted: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.to_string()))
        .collect();

    let effect = effect.as_str();
    let mut combined = format!("{}:{effect}", effect.len());
    for (k, v) in &sorted {
        combined.push_str(&format!("|{}:{k}={}:{v}", k.len(), v.len()));
    }

    let digest = hex::encode(Sha256::digest(combined.as_bytes()));
    digest[..32].to_string()
}

/// Entity id for placing an order.
pub fn order_entity_id(symbol: &str, side: &str, quantity: f64, price: Option<f64>) -> String {
    let mut params = vec![
        ("symbol", symbol.to_string()),
        ("side", side.to_string()),
        ("quantity", quantity.to_string()),
    ];
    if let Some(price) = price {
        params.push(("price", price.to_string()));
    }
    generate_entity_id(&EffectKind::OrderPlacement, params)
}

/// Entity id for updating a position.
pub fn position_entity_id(symbol: &str, position_id: &str) -> String {
    generate_entity_id(
        &EffectKind::PositionUpdate,
        [("symbol", symbol), ("position_id", position_id)],
    )
}

/// Entity id for writing a trade's PnL.
pub fn pnl_entity_id(trade_id: &str) -> String {
    generate_entity_id(&EffectKind::PnlWrite, [("trade_id", trade_id)])
}

/// Entity id for consuming a signal.
pub fn signal_entity_id(signal_id: &str, symbol: &str) -> String {
    generate_entity_id(
        &EffectKind::SignalConsumption,
        [("signal_id", signal_id), ("symbol", symbol)],
    )
}
