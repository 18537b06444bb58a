use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use tokio::sync::broadcast;

use crate::models::{NewNotification, Notification};

/// Writes the user-visible record of a fired alert. Called once per
/// successful trigger; a failure here never un-triggers the alert.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create(&self, fields: NewNotification) -> Result<Notification, String>;
}

pub const NOTIFICATIONS_UPDATED: &str = "notificationsUpdated";

#[derive(Clone)]
pub struct MongoNotificationSink {
    db: mongodb::Database,
    events_tx: broadcast::Sender<String>,
}

impl MongoNotificationSink {
    pub fn new(db: mongodb::Database, events_tx: broadcast::Sender<String>) -> Self {
        Self { db, events_tx }
    }
}

#[async_trait]
impl NotificationSink for MongoNotificationSink {
    async fn create(&self, fields: NewNotification) -> Result<Notification, String> {
        let note = Notification {
            id: ObjectId::new(),
            user_id: fields.user_id,
            kind: "price_alert".to_string(),
            coin_label: fields.coin_label,
            message: fields.message,
            price: fields.price,
            target_price: fields.target_price,
            read: false,
            created_at: Utc::now().timestamp(),
        };

        self.db
            .collection::<Notification>("notifications")
            .insert_one(&note, None)
            .await
            .map_err(|e| e.to_string())?;

        let _ = self.events_tx.send(NOTIFICATIONS_UPDATED.to_string());

        Ok(note)
    }
}
