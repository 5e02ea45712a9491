//! API response types for the exchange's data and CLOB surfaces.

use rust_decimal::Decimal;
use serde::Deserialize;

/// One entry from the `/activity?user=<address>` feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Seconds since epoch.
    pub timestamp: i64,
    pub condition_id: String,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub usdc_size: f64,
    #[serde(default)]
    pub price: f64,
    /// Outcome token id.
    pub asset: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub outcome_index: i64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(rename = "type", default = "default_activity_type")]
    pub activity_type: String,
}

fn default_activity_type() -> String {
    "TRADE".to_string()
}

/// One entry from the `/positions?user=<address>` feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    /// Outcome token id.
    pub asset: String,
    pub condition_id: String,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub avg_price: f64,
    #[serde(default)]
    pub cur_price: f64,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub redeemable: bool,
    #[serde(default)]
    pub mergeable: bool,
}

/// Portfolio value response from the `/value` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ValueResponse {
    pub value: f64,
}

/// One price level of the order book. Prices and sizes arrive as decimal
/// strings.
#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

impl BookLevel {
    pub fn parsed(&self) -> Option<(Decimal, Decimal)> {
        let price = self.price.parse().ok()?;
        let size = self.size.parse().ok()?;
        Some((price, size))
    }
}

/// Order book for one outcome token.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Best bid as `(price, size)`: the highest bid price. No ordering is
    /// assumed on the feed.
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids
            .iter()
            .filter_map(BookLevel::parsed)
            .max_by(|a, b| a.0.cmp(&b.0))
    }

    /// Best ask as `(price, size)`: the lowest ask price.
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks
            .iter()
            .filter_map(BookLevel::parsed)
            .min_by(|a, b| a.0.cmp(&b.0))
    }

    /// USD notional resting on the bid side.
    pub fn bid_depth_usd(&self) -> Decimal {
        self.bids
            .iter()
            .filter_map(BookLevel::parsed)
            .map(|(p, s)| p * s)
            .sum()
    }

    /// USD notional resting on the ask side.
    pub fn ask_depth_usd(&self) -> Decimal {
        self.asks
            .iter()
            .filter_map(BookLevel::parsed)
            .map(|(p, s)| p * s)
            .sum()
    }
}

/// The exchange's error payload is polymorphic: a bare string or a nested
/// object with any of `error` / `message` / `errorMsg` set.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExchangeError {
    Text(String),
    Nested {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default, rename = "errorMsg")]
        error_msg: Option<String>,
    },
}

impl ExchangeError {
    /// Extract the human-readable message regardless of shape.
    pub fn message(&self) -> &str {
        match self {
            ExchangeError::Text(s) => s,
            ExchangeError::Nested {
                error,
                message,
                error_msg,
            } => error
                .as_deref()
                .or(message.as_deref())
                .or(error_msg.as_deref())
                .unwrap_or("unknown exchange error"),
        }
    }
}

/// Balance and allowance failures are terminal; retrying cannot help.
pub fn is_non_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not enough balance") || lower.contains("allowance")
}

/// Response from order submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "orderID", default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub error: Option<ExchangeError>,
}

impl OrderResponse {
    pub fn error_message(&self) -> &str {
        self.error
            .as_ref()
            .map(ExchangeError::message)
            .unwrap_or("unknown exchange error")
    }
}
