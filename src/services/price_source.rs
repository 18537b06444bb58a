use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};

use crate::models::PriceQuote;

/// Batched quote lookup: one call covers every coin the caller asks about.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_prices(
        &self,
        coin_ids: &[String],
        currency: &str,
    ) -> Result<HashMap<String, PriceQuote>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure isolation for a flaky upstream. CLOSED counts consecutive
/// failures and trips OPEN at the threshold; OPEN rejects calls until the
/// cooldown elapses, then admits probes as HALF_OPEN; HALF_OPEN closes
/// after enough consecutive successes and reopens on any failure.
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,

    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
            failure_threshold,
            success_threshold,
            cooldown,
        }
    }

    /// Whether a real upstream call may go out right now. Moves OPEN to
    /// HALF_OPEN once the cooldown has elapsed.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);

                if cooled {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_successes = 0;
                    tracing::info!("price source circuit half-open, probing upstream");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.success_threshold {
                    self.state = CircuitState::Closed;
                    self.consecutive_failures = 0;
                    self.opened_at = None;
                    tracing::info!("price source circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.trip();
                }
            }
            // One failed probe sends it straight back to OPEN.
            CircuitState::HalfOpen => self.trip(),
            CircuitState::Open => {}
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.half_open_successes = 0;
        tracing::warn!(
            failures = self.consecutive_failures,
            "price source circuit open"
        );
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }
}

#[derive(Debug, Clone)]
pub struct PriceSourceConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub max_retries: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl Default for PriceSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            request_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(60),
            max_retries: 3,
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(60),
        }
    }
}

struct CachedQuotes {
    quotes: HashMap<String, PriceQuote>,
    fetched_at: Instant,
}

/// CoinGecko `/simple/price` client with a short-lived response cache and a
/// circuit breaker. The cache is instance state, not a module global, so
/// two clients never share entries and tests stay deterministic.
pub struct CoinGeckoClient {
    http: Client,
    config: PriceSourceConfig,
    cache: Mutex<HashMap<String, CachedQuotes>>,
    breaker: Mutex<CircuitBreaker>,
}

impl CoinGeckoClient {
    pub fn new(config: PriceSourceConfig) -> Self {
        let breaker = CircuitBreaker::new(
            config.failure_threshold,
            config.success_threshold,
            config.cooldown,
        );

        Self {
            http: Client::new(),
            config,
            cache: Mutex::new(HashMap::new()),
            breaker: Mutex::new(breaker),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().unwrap().state()
    }

    fn cache_lookup(&self, key: &str, max_age: Option<Duration>) -> Option<HashMap<String, PriceQuote>> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(key)?;

        if let Some(ttl) = max_age {
            if entry.fetched_at.elapsed() >= ttl {
                return None;
            }
        }

        Some(entry.quotes.clone())
    }

    fn cache_store(&self, key: String, quotes: HashMap<String, PriceQuote>) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            key,
            CachedQuotes {
                quotes,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Circuit is open or the fetch failed: serve stale cache if we have it,
    /// else the fallback table. Errors only when neither yields a quote.
    fn degraded(
        &self,
        key: &str,
        ids: &[String],
        upstream_err: String,
    ) -> Result<HashMap<String, PriceQuote>, String> {
        if let Some(stale) = self.cache_lookup(key, None) {
            tracing::warn!("serving stale prices for {key}");
            return Ok(stale);
        }

        let fallback = fallback_quotes(ids);
        if !fallback.is_empty() {
            tracing::warn!("serving fallback prices for {key}");
            return Ok(fallback);
        }

        Err(upstream_err)
    }

    async fn fetch_with_retry(
        &self,
        ids_param: &str,
        currency: &str,
    ) -> Result<HashMap<String, PriceQuote>, String> {
        let url = format!("{}/simple/price", self.config.base_url);
        let change_key = format!("{currency}_24h_change");

        let mut attempt: u32 = 0;
        loop {
            let res = self
                .http
                .get(&url)
                .query(&[
                    ("ids", ids_param),
                    ("vs_currencies", currency),
                    ("include_24hr_change", "true"),
                ])
                .timeout(self.config.request_timeout)
                .send()
                .await;

            match res {
                Ok(r) if r.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= self.config.max_retries {
                        return Err("price api rate limited, retries exhausted".to_string());
                    }
                    let delay = retry_after(&r).unwrap_or_else(|| backoff_delay(attempt));
                    tracing::warn!(?delay, "price api rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Ok(r) if !r.status().is_success() => {
                    let status = r.status();
                    let body = r.text().await.unwrap_or_default();
                    return Err(format!("price api failed: {status} {body}"));
                }
                Ok(r) => {
                    // The 24h change field can come back null, so this goes
                    // through Value rather than a typed map.
                    let raw = r
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| e.to_string())?;
                    let obj = raw
                        .as_object()
                        .ok_or_else(|| "unexpected price api response shape".to_string())?;

                    let now = chrono::Utc::now().timestamp();
                    let mut quotes = HashMap::new();
                    for (id, fields) in obj {
                        let Some(price) = fields.get(currency).and_then(|v| v.as_f64()) else {
                            continue;
                        };
                        if !price.is_finite() || price <= 0.0 {
                            continue;
                        }
                        let change_24h = fields
                            .get(&change_key)
                            .and_then(|v| v.as_f64())
                            .unwrap_or(0.0);
                        quotes.insert(
                            id.clone(),
                            PriceQuote {
                                price,
                                change_24h,
                                fetched_at: now,
                            },
                        );
                    }

                    return Ok(quotes);
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(?delay, "price api unreachable, backing off: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.to_string()),
            }

            attempt += 1;
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn get_prices(
        &self,
        coin_ids: &[String],
        currency: &str,
    ) -> Result<HashMap<String, PriceQuote>, String> {
        // Dedupe and sort so equivalent requests share a cache key.
        let mut ids: Vec<String> = coin_ids.iter().map(|s| s.to_lowercase()).collect();
        ids.sort();
        ids.dedup();

        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let key = format!("{}|{currency}", ids.join(","));

        if let Some(fresh) = self.cache_lookup(&key, Some(self.config.cache_ttl)) {
            return Ok(fresh);
        }

        let admitted = self.breaker.lock().unwrap().allow_request();
        if !admitted {
            return self.degraded(&key, &ids, "price source circuit open".to_string());
        }

        match self.fetch_with_retry(&ids.join(","), currency).await {
            Ok(quotes) => {
                self.breaker.lock().unwrap().on_success();
                self.cache_store(key, quotes.clone());
                Ok(quotes)
            }
            Err(e) => {
                self.breaker.lock().unwrap().on_failure();
                tracing::warn!("price fetch failed: {e}");
                self.degraded(&key, &ids, e)
            }
        }
    }
}

fn retry_after(res: &reqwest::Response) -> Option<Duration> {
    let secs = res
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()?;

    Some(Duration::from_secs(secs.min(60)))
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = 500u64 * 2u64.pow(attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..250);
    Duration::from_millis(base + jitter)
}

/// Deterministic last-resort quotes for major coins, used when the circuit
/// is open and nothing is cached. Coins outside the table get no entry.
pub fn fallback_quotes(ids: &[String]) -> HashMap<String, PriceQuote> {
    const TABLE: &[(&str, f64)] = &[
        ("bitcoin", 60000.0),
        ("ethereum", 3000.0),
        ("tether", 1.0),
        ("binancecoin", 500.0),
        ("solana", 150.0),
        ("ripple", 0.5),
        ("usd-coin", 1.0),
        ("cardano", 0.4),
        ("dogecoin", 0.1),
        ("polkadot", 6.0),
    ];

    let now = chrono::Utc::now().timestamp();
    let mut quotes = HashMap::new();

    for id in ids {
        if let Some(&(_, price)) = TABLE.iter().find(|(name, _)| name == id) {
            quotes.insert(
                id.clone(),
                PriceQuote {
                    price,
                    change_24h: 0.0,
                    fetched_at: now,
                },
            );
        }
    }

    quotes
}
