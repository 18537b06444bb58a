pub mod alert_engine;
pub mod alert_store;
pub mod evaluator;
pub mod notifications;
pub mod price_source;
