use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Persisted record of a fired alert, for display to the user. Written
/// exactly once per successful trigger; only the read flag changes later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub user_id: ObjectId,

    // Always "price_alert" for records written by this crate.
    pub kind: String,

    pub coin_label: String,
    pub message: String,

    // Price at the moment the alert fired, and the threshold it crossed.
    pub price: f64,
    pub target_price: f64,

    pub read: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: ObjectId,
    pub coin_label: String,
    pub message: String,
    pub price: f64,
    pub target_price: f64,
}
