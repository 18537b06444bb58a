use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A standing instruction to notify the owner when a coin's price crosses
/// a threshold. Pending iff `is_active` and `triggered_at` is unset; the
/// pending -> triggered transition happens at most once and is one-way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,

    // Key into the price source's namespace, e.g. "bitcoin".
    pub coin_id: String,

    // Display only, no behavioral effect.
    pub coin_name: String,
    pub symbol: String,

    // "above" | "below"
    pub condition: String,
    pub target_price: f64,

    pub is_active: bool,
    pub triggered_at: Option<i64>,

    pub created_at: i64,
}

impl Alert {
    pub fn is_pending(&self) -> bool {
        self.is_active && self.triggered_at.is_none()
    }
}

/// Fields supplied by the user at creation time, before an id and
/// timestamps are assigned.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub coin_id: String,
    pub coin_name: String,
    pub symbol: String,
    pub condition: String,
    pub target_price: f64,
}

impl NewAlert {
    /// Rejects bad input before it ever reaches the store.
    pub fn validate(&self) -> Result<(), String> {
        if self.coin_id.trim().is_empty() {
            return Err("coin identifier is required".to_string());
        }

        let cond = self.condition.to_lowercase();
        if cond != "above" && cond != "below" {
            return Err(format!(
                "condition must be \"above\" or \"below\", got {:?}",
                self.condition
            ));
        }

        if !self.target_price.is_finite() || self.target_price <= 0.0 {
            return Err("target price must be a positive number".to_string());
        }

        Ok(())
    }
}
