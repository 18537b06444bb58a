use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    pub mongodb_uri: String,
    pub mongodb_db: String,

    pub price_api_base: String,
    pub vs_currency: String,

    // Seconds between engine ticks. Callers observed in the wild run this
    // anywhere from 8s to 60s, so it stays a knob.
    pub poll_interval_secs: u64,

    pub price_cache_ttl_secs: u64,
    pub price_timeout_secs: u64,
    pub price_max_retries: u32,

    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_cooldown_secs: u64,

    // Hex ObjectId of the single user whose alerts the daemon monitors.
    pub monitor_user_id: String,
}

pub fn load() -> Settings {
    // Loads .env if present (no crash if missing)
    dotenvy::dotenv().ok();

    let mongodb_uri =
        env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

    let mongodb_db = env::var("MONGODB_DB").unwrap_or_else(|_| "coinsentry".to_string());

    let price_api_base = env::var("PRICE_API_BASE")
        .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string());

    let vs_currency = env::var("VS_CURRENCY")
        .unwrap_or_else(|_| "usd".to_string())
        .to_lowercase();

    let poll_interval_secs = env_u64("POLL_INTERVAL_SECS", 60);
    let price_cache_ttl_secs = env_u64("PRICE_CACHE_TTL_SECS", 60);
    let price_timeout_secs = env_u64("PRICE_TIMEOUT_SECS", 10);
    let price_max_retries = env_u64("PRICE_MAX_RETRIES", 3) as u32;

    let breaker_failure_threshold = env_u64("BREAKER_FAILURE_THRESHOLD", 5) as u32;
    let breaker_success_threshold = env_u64("BREAKER_SUCCESS_THRESHOLD", 2) as u32;
    let breaker_cooldown_secs = env_u64("BREAKER_COOLDOWN_SECS", 60);

    let monitor_user_id = env::var("MONITOR_USER_ID").unwrap_or_default();

    Settings {
        mongodb_uri,
        mongodb_db,
        price_api_base,
        vs_currency,
        poll_interval_secs,
        price_cache_ttl_secs,
        price_timeout_secs,
        price_max_retries,
        breaker_failure_threshold,
        breaker_success_threshold,
        breaker_cooldown_secs,
        monitor_user_id,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
