use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::models::{Alert, NewNotification};
use crate::services::alert_store::AlertStore;
use crate::services::evaluator;
use crate::services::notifications::NotificationSink;
use crate::services::price_source::PriceSource;

/// Result of one attempt at the trigger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// This call flipped the alert and wrote (or at least attempted) the
    /// notification.
    Fired,
    /// Someone else flipped it first, or it was deleted meanwhile. Not an
    /// error.
    AlreadyTriggered,
    /// The price did not satisfy the condition (immediate path only).
    NotTriggered,
}

fn trigger_message(alert: &Alert, current_price: f64) -> String {
    format!(
        "{} price {} is {} your target of {}",
        alert.symbol, current_price, alert.condition, alert.target_price
    )
}

/// The one trigger transaction, shared by the periodic engine and the
/// immediate post-creation check: conditional store update first, then a
/// best-effort notification. A notification failure is logged and swallowed
/// because the alert has already definitively triggered; rolling it back
/// would leave the alert perpetually re-triggerable.
pub async fn fire_alert(
    store: &dyn AlertStore,
    notifications: &dyn NotificationSink,
    alert: &Alert,
    current_price: f64,
) -> Result<TriggerOutcome, String> {
    let now = Utc::now().timestamp();

    let updated = store.conditional_trigger(alert.id, now).await?;
    if !updated {
        tracing::debug!(alert_id = %alert.id, "alert already triggered elsewhere");
        return Ok(TriggerOutcome::AlreadyTriggered);
    }

    let note = NewNotification {
        user_id: alert.user_id,
        coin_label: alert.coin_name.clone(),
        message: trigger_message(alert, current_price),
        price: current_price,
        target_price: alert.target_price,
    };

    if let Err(e) = notifications.create(note).await {
        tracing::warn!(alert_id = %alert.id, "notification insert failed after trigger: {e}");
    } else {
        tracing::info!(
            alert_id = %alert.id,
            coin = %alert.coin_id,
            price = current_price,
            "alert fired"
        );
    }

    Ok(TriggerOutcome::Fired)
}

/// Immediate post-creation check, using the price already known at creation
/// time (no extra fetch). Catches alerts created already past their
/// threshold. Same evaluator, same trigger transaction as the engine tick.
pub async fn check_new_alert(
    store: &dyn AlertStore,
    notifications: &dyn NotificationSink,
    alert: &Alert,
    known_price: f64,
) -> Result<TriggerOutcome, String> {
    if !evaluator::should_trigger(&alert.condition, known_price, alert.target_price) {
        return Ok(TriggerOutcome::NotTriggered);
    }

    fire_alert(store, notifications, alert, known_price).await
}

/// What one tick did, for status display and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    pub considered: usize,
    pub suppressed: usize,
    pub coins_fetched: usize,
    pub fired: usize,
    pub already_triggered: usize,
}

/// Checks all of one owner's pending alerts against current prices. The
/// loop itself lives in `AlertMonitor`; `tick` is public so tests can drive
/// the engine without waiting on wall-clock time.
pub struct AlertEngine {
    store: Arc<dyn AlertStore>,
    prices: Arc<dyn PriceSource>,
    notifications: Arc<dyn NotificationSink>,
    user_id: ObjectId,
    currency: String,

    // Ids already fired this session. An optimization against re-processing
    // mid-flight triggers, never the correctness mechanism: that is the
    // store's conditional update.
    fired: Mutex<HashSet<ObjectId>>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn AlertStore>,
        prices: Arc<dyn PriceSource>,
        notifications: Arc<dyn NotificationSink>,
        user_id: ObjectId,
        currency: String,
    ) -> Self {
        Self {
            store,
            prices,
            notifications,
            user_id,
            currency,
            fired: Mutex::new(HashSet::new()),
        }
    }

    pub fn user_id(&self) -> ObjectId {
        self.user_id
    }

    /// Ids in the session suppression set.
    pub fn session_fired(&self) -> Vec<ObjectId> {
        self.fired.lock().unwrap().iter().copied().collect()
    }

    pub fn clear_session(&self) {
        self.fired.lock().unwrap().clear();
    }

    /// One pass over all pending alerts. A store read failure or a total
    /// price-fetch failure aborts the tick without touching any alert state;
    /// the next tick retries from scratch.
    pub async fn tick(&self) -> Result<TickReport, String> {
        let mut report = TickReport::default();

        // 1) Pending alerts for this owner.
        let alerts = self.store.list_active(self.user_id).await?;
        report.considered = alerts.len();
        if alerts.is_empty() {
            return Ok(report);
        }

        // 2) Skip anything already fired this session.
        let pending: Vec<Alert> = {
            let fired = self.fired.lock().unwrap();
            alerts.into_iter().filter(|a| !fired.contains(&a.id)).collect()
        };
        report.suppressed = report.considered - pending.len();
        if pending.is_empty() {
            return Ok(report);
        }

        // 3) Group by coin so one price call covers every alert per coin.
        let mut by_coin: HashMap<String, Vec<Alert>> = HashMap::new();
        for a in pending {
            by_coin.entry(a.coin_id.clone()).or_default().push(a);
        }

        // 4) One batched fetch for the whole tick; every alert on a coin
        //    sees the same snapshot.
        let coin_ids: Vec<String> = by_coin.keys().cloned().collect();
        let quotes = self.prices.get_prices(&coin_ids, &self.currency).await?;
        report.coins_fetched = quotes.len();

        for (coin_id, group) in by_coin {
            // No quote for this coin this tick: leave its alerts untouched.
            let Some(quote) = quotes.get(&coin_id) else {
                continue;
            };

            for alert in group {
                // 5) The shared evaluator decides.
                if !evaluator::should_trigger(&alert.condition, quote.price, alert.target_price) {
                    continue;
                }

                // 6) Suppress before the store call, so a slow write can't
                //    be double-processed by an overlapping tick.
                self.fired.lock().unwrap().insert(alert.id);

                match fire_alert(
                    self.store.as_ref(),
                    self.notifications.as_ref(),
                    &alert,
                    quote.price,
                )
                .await
                {
                    Ok(TriggerOutcome::Fired) => report.fired += 1,
                    // Lost the race: stays suppressed, nothing to do.
                    Ok(TriggerOutcome::AlreadyTriggered) => report.already_triggered += 1,
                    Ok(TriggerOutcome::NotTriggered) => {}
                    // Genuine write failure: roll back suppression so the
                    // next tick can retry this alert.
                    Err(e) => {
                        self.fired.lock().unwrap().remove(&alert.id);
                        tracing::warn!(alert_id = %alert.id, "trigger write failed: {e}");
                    }
                }
            }
        }

        Ok(report)
    }
}

struct RunningEngine {
    engine: Arc<AlertEngine>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Owns the polling loop and the one-running-engine-per-owner rule.
/// Starting for the owner already running is a no-op; starting for a
/// different owner stops the previous engine first. Stopping lets an
/// in-flight tick finish and schedules no further ticks.
pub struct AlertMonitor {
    store: Arc<dyn AlertStore>,
    prices: Arc<dyn PriceSource>,
    notifications: Arc<dyn NotificationSink>,
    poll_interval: Duration,
    currency: String,
    running: Mutex<Option<RunningEngine>>,
}

impl AlertMonitor {
    pub fn new(
        store: Arc<dyn AlertStore>,
        prices: Arc<dyn PriceSource>,
        notifications: Arc<dyn NotificationSink>,
        poll_interval: Duration,
        currency: String,
    ) -> Self {
        Self {
            store,
            prices,
            notifications,
            poll_interval,
            currency,
            running: Mutex::new(None),
        }
    }

    pub fn current_user(&self) -> Option<ObjectId> {
        self.running
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.engine.user_id())
    }

    /// Engine for the currently monitored owner, for status inspection.
    pub fn running_engine(&self) -> Option<Arc<AlertEngine>> {
        self.running
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| Arc::clone(&r.engine))
    }

    pub fn start(&self, user_id: ObjectId) {
        let mut running = self.running.lock().unwrap();

        if let Some(r) = running.as_ref() {
            if r.engine.user_id() == user_id {
                return;
            }
            tracing::info!(user = %r.engine.user_id(), "stopping alert engine for previous user");
            let _ = r.shutdown.send(true);
        }

        let engine = Arc::new(AlertEngine::new(
            Arc::clone(&self.store),
            Arc::clone(&self.prices),
            Arc::clone(&self.notifications),
            user_id,
            self.currency.clone(),
        ));

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let loop_engine = Arc::clone(&engine);
        let poll_interval = self.poll_interval;

        let join = tokio::spawn(async move {
            // First tick fires immediately, then on the interval.
            let mut interval = time::interval(poll_interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        match loop_engine.tick().await {
                            Ok(report) if report.fired > 0 => {
                                tracing::info!(fired = report.fired, "alert tick complete");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("alert tick failed: {e}"),
                        }
                    }
                }
            }
        });

        tracing::info!(user = %user_id, interval = ?self.poll_interval, "alert engine started");

        *running = Some(RunningEngine {
            engine,
            shutdown,
            join,
        });
    }

    /// Stops the running engine, if any, and waits for its loop to exit.
    /// Session state (the suppression set) dies with the engine.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();

        if let Some(r) = running {
            let _ = r.shutdown.send(true);
            let _ = r.join.await;
            tracing::info!(user = %r.engine.user_id(), "alert engine stopped");
        }
    }
}
