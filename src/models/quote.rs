use serde::{Deserialize, Serialize};

/// A point-in-time quote for one coin. Ephemeral: produced by the price
/// source, consumed within the same evaluation pass, never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub change_24h: f64,
    pub fetched_at: i64,
}
