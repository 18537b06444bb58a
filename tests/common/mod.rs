#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use tokio::sync::broadcast;

use coinsentry::models::{Alert, NewAlert, NewNotification, Notification, PriceQuote};
use coinsentry::services::alert_store::AlertStore;
use coinsentry::services::notifications::NotificationSink;
use coinsentry::services::price_source::PriceSource;

pub fn alert(user_id: ObjectId, coin_id: &str, condition: &str, target_price: f64) -> Alert {
    // Stored ids are always lowercase (the store normalizes on create), so
    // the helper holds the same invariant.
    let coin_id = coin_id.to_lowercase();

    let mut coin_name = coin_id.clone();
    if let Some(first) = coin_name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }

    Alert {
        id: ObjectId::new(),
        user_id,
        coin_id: coin_id.clone(),
        coin_name,
        symbol: coin_id[..coin_id.len().min(3)].to_uppercase(),
        condition: condition.to_string(),
        target_price,
        is_active: true,
        triggered_at: None,
        created_at: Utc::now().timestamp(),
    }
}

pub fn quote(price: f64) -> PriceQuote {
    PriceQuote {
        price,
        change_24h: 0.0,
        fetched_at: Utc::now().timestamp(),
    }
}

/// In-memory stand-in for the alert collection, with failure injection and
/// a stale-read mode that keeps returning already-triggered rows the way a
/// lagging replica would.
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
    events_tx: broadcast::Sender<String>,
    pub serve_stale_list: AtomicBool,
    pub fail_list: AtomicBool,
    pub fail_trigger: AtomicBool,
    pub trigger_calls: AtomicUsize,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(16);
        Self {
            alerts: Mutex::new(Vec::new()),
            events_tx,
            serve_stale_list: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            fail_trigger: AtomicBool::new(false),
            trigger_calls: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }

    pub fn get(&self, id: ObjectId) -> Option<Alert> {
        self.alerts.lock().unwrap().iter().find(|a| a.id == id).cloned()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn create_alert(&self, user_id: ObjectId, fields: NewAlert) -> Result<Alert, String> {
        fields.validate()?;

        let created = Alert {
            id: ObjectId::new(),
            user_id,
            coin_id: fields.coin_id.to_lowercase(),
            coin_name: fields.coin_name,
            symbol: fields.symbol.to_uppercase(),
            condition: fields.condition.to_lowercase(),
            target_price: fields.target_price,
            is_active: true,
            triggered_at: None,
            created_at: Utc::now().timestamp(),
        };

        self.alerts.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn list_active(&self, user_id: ObjectId) -> Result<Vec<Alert>, String> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err("injected list failure".to_string());
        }

        let stale = self.serve_stale_list.load(Ordering::SeqCst);
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.user_id == user_id && (stale || a.is_pending()))
            .cloned()
            .collect())
    }

    async fn list_for_coin(&self, user_id: ObjectId, coin_id: &str) -> Result<Vec<Alert>, String> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.user_id == user_id && a.coin_id == coin_id)
            .cloned()
            .collect())
    }

    async fn delete_alert(&self, user_id: ObjectId, alert_id: ObjectId) -> Result<(), String> {
        self.alerts
            .lock()
            .unwrap()
            .retain(|a| !(a.id == alert_id && a.user_id == user_id));
        Ok(())
    }

    async fn conditional_trigger(
        &self,
        alert_id: ObjectId,
        triggered_at: i64,
    ) -> Result<bool, String> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_trigger.load(Ordering::SeqCst) {
            return Err("injected trigger failure".to_string());
        }

        let mut alerts = self.alerts.lock().unwrap();
        for a in alerts.iter_mut() {
            if a.id == alert_id && a.is_pending() {
                a.is_active = false;
                a.triggered_at = Some(triggered_at);
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events_tx.subscribe()
    }
}

/// Collects notifications in memory, with failure injection.
pub struct CountingSink {
    notes: Mutex<Vec<Notification>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl CountingSink {
    pub fn new() -> Self {
        Self {
            notes: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn notes(&self) -> Vec<Notification> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for CountingSink {
    async fn create(&self, fields: NewNotification) -> Result<Notification, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err("injected notification failure".to_string());
        }

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

        self.notes.lock().unwrap().push(note.clone());
        Ok(note)
    }
}

/// Price source that replays scripted responses and records every request.
pub struct ScriptedPrices {
    responses: Mutex<VecDeque<Result<HashMap<String, PriceQuote>, String>>>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedPrices {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_ok(&self, pairs: &[(&str, f64)]) {
        let map = pairs
            .iter()
            .map(|&(id, price)| (id.to_string(), quote(price)))
            .collect();
        self.responses.lock().unwrap().push_back(Ok(map));
    }

    pub fn push_err(&self, msg: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(msg.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PriceSource for ScriptedPrices {
    async fn get_prices(
        &self,
        coin_ids: &[String],
        _currency: &str,
    ) -> Result<HashMap<String, PriceQuote>, String> {
        let mut ids: Vec<String> = coin_ids.to_vec();
        ids.sort();
        self.calls.lock().unwrap().push(ids);

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}
