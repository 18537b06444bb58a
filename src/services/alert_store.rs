use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::FindOptions;
use tokio::sync::broadcast;

use crate::models::{Alert, NewAlert};

/// Owner-scoped alert persistence. The store is the single source of truth;
/// `conditional_trigger` carries the whole mutual-exclusion burden, so no
/// client-side locking is needed anywhere above it.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create_alert(&self, user_id: ObjectId, fields: NewAlert) -> Result<Alert, String>;

    /// Only alerts that are still pending: is_active and never triggered.
    async fn list_active(&self, user_id: ObjectId) -> Result<Vec<Alert>, String>;

    async fn list_for_coin(&self, user_id: ObjectId, coin_id: &str) -> Result<Vec<Alert>, String>;

    async fn delete_alert(&self, user_id: ObjectId, alert_id: ObjectId) -> Result<(), String>;

    /// Flips the alert to triggered iff it is still pending at the moment of
    /// the update. Returns `Ok(true)` when this call performed the flip and
    /// `Ok(false)` when the row no longer matched (already triggered, or
    /// deleted meanwhile), which is a no-op signal, not an error.
    async fn conditional_trigger(
        &self,
        alert_id: ObjectId,
        triggered_at: i64,
    ) -> Result<bool, String>;

    /// Change feed for presentation refresh; the engine does not depend on
    /// it for correctness.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

pub const ALERTS_UPDATED: &str = "alertsUpdated";

#[derive(Clone)]
pub struct MongoAlertStore {
    db: mongodb::Database,
    events_tx: broadcast::Sender<String>,
}

impl MongoAlertStore {
    pub fn new(db: mongodb::Database, events_tx: broadcast::Sender<String>) -> Self {
        Self { db, events_tx }
    }

    fn alerts(&self) -> mongodb::Collection<Alert> {
        self.db.collection::<Alert>("alerts")
    }

    fn notify_changed(&self) {
        let _ = self.events_tx.send(ALERTS_UPDATED.to_string());
    }
}

#[async_trait]
impl AlertStore for MongoAlertStore {
    async fn create_alert(&self, user_id: ObjectId, fields: NewAlert) -> Result<Alert, String> {
        fields.validate()?;

        let now = Utc::now().timestamp();
        let alert = Alert {
            id: ObjectId::new(),
            user_id,
            coin_id: fields.coin_id.to_lowercase(),
            coin_name: fields.coin_name,
            symbol: fields.symbol.to_uppercase(),
            condition: fields.condition.to_lowercase(),
            target_price: fields.target_price,
            is_active: true,
            triggered_at: None,
            created_at: now,
        };

        self.alerts()
            .insert_one(&alert, None)
            .await
            .map_err(|e| e.to_string())?;

        self.notify_changed();

        Ok(alert)
    }

    async fn list_active(&self, user_id: ObjectId) -> Result<Vec<Alert>, String> {
        let mut cursor = self
            .alerts()
            .find(
                doc! { "user_id": user_id, "is_active": true, "triggered_at": null },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;

        let mut items: Vec<Alert> = Vec::new();
        while let Some(res) = cursor.next().await {
            items.push(res.map_err(|e| e.to_string())?);
        }

        Ok(items)
    }

    async fn list_for_coin(&self, user_id: ObjectId, coin_id: &str) -> Result<Vec<Alert>, String> {
        let find_opts = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();

        let mut cursor = self
            .alerts()
            .find(
                doc! { "user_id": user_id, "coin_id": coin_id.to_lowercase() },
                find_opts,
            )
            .await
            .map_err(|e| e.to_string())?;

        let mut items: Vec<Alert> = Vec::new();
        while let Some(res) = cursor.next().await {
            items.push(res.map_err(|e| e.to_string())?);
        }

        Ok(items)
    }

    async fn delete_alert(&self, user_id: ObjectId, alert_id: ObjectId) -> Result<(), String> {
        self.alerts()
            .delete_one(doc! { "_id": alert_id, "user_id": user_id }, None)
            .await
            .map_err(|e| e.to_string())?;

        self.notify_changed();

        Ok(())
    }

    async fn conditional_trigger(
        &self,
        alert_id: ObjectId,
        triggered_at: i64,
    ) -> Result<bool, String> {
        // The filter is the atomic guard: only a still-pending row matches,
        // so concurrent callers race on the server and exactly one wins.
        let res = self
            .alerts()
            .update_one(
                doc! { "_id": alert_id, "is_active": true, "triggered_at": null },
                doc! { "$set": { "is_active": false, "triggered_at": triggered_at } },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;

        if res.matched_count > 0 {
            self.notify_changed();
        }

        Ok(res.matched_count > 0)
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events_tx.subscribe()
    }
}
