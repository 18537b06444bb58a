use std::sync::Arc;
use std::time::Duration;

use mongodb::Client;
use mongodb::bson::oid::ObjectId;
use tokio::sync::broadcast;

use coinsentry::config;
use coinsentry::services::alert_engine::AlertMonitor;
use coinsentry::services::alert_store::MongoAlertStore;
use coinsentry::services::notifications::MongoNotificationSink;
use coinsentry::services::price_source::{CoinGeckoClient, PriceSourceConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let settings = config::load();

    let user_id = ObjectId::parse_str(&settings.monitor_user_id)
        .expect("MONITOR_USER_ID must be a valid ObjectId hex string");

    // Mongo connection
    let client = Client::with_uri_str(&settings.mongodb_uri)
        .await
        .expect("Failed to connect to MongoDB");
    let db = client.database(&settings.mongodb_db);

    let (events_tx, _events_rx) = broadcast::channel::<String>(32);

    let store = Arc::new(MongoAlertStore::new(db.clone(), events_tx.clone()));
    let notifications = Arc::new(MongoNotificationSink::new(db, events_tx));

    let prices = Arc::new(CoinGeckoClient::new(PriceSourceConfig {
        base_url: settings.price_api_base.clone(),
        request_timeout: Duration::from_secs(settings.price_timeout_secs),
        cache_ttl: Duration::from_secs(settings.price_cache_ttl_secs),
        max_retries: settings.price_max_retries,
        failure_threshold: settings.breaker_failure_threshold,
        success_threshold: settings.breaker_success_threshold,
        cooldown: Duration::from_secs(settings.breaker_cooldown_secs),
    }));

    let monitor = AlertMonitor::new(
        store,
        prices,
        notifications,
        Duration::from_secs(settings.poll_interval_secs),
        settings.vs_currency.clone(),
    );

    monitor.start(user_id);
    tracing::info!("monitoring price alerts for user {user_id}");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");

    monitor.stop().await;
}
