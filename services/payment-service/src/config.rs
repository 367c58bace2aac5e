// /shop-platform/services/payment-service/src/config.rs

use std::{env, str::FromStr, time::Duration};

use crate::utils::error::{AppError, AppResult};

pub const DEFAULT_MOMO_ENDPOINT: &str = "https://test-payment.momo.vn/v2/gateway/api/create";
pub const DEFAULT_MOMO_REFUND_ENDPOINT: &str = "https://test-payment.momo.vn/v2/gateway/api/refund";
pub const DEFAULT_MOMO_QUERY_ENDPOINT: &str = "https://test-payment.momo.vn/v2/gateway/api/query";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub brokers: Vec<String>,
    pub partitions: u32,
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub endpoint: String,
    pub refund_endpoint: String,
    pub query_endpoint: String,
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Outbox publisher cadence
    pub pending_interval: Duration,
    /// Refund driver cadence
    pub retry_interval: Duration,
    pub reconcile_interval: Duration,
    pub cleanup_interval: Duration,
    pub stats_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database: DatabaseConfig,
    pub bus: BusConfig,
    pub momo: MomoConfig,
    pub scheduler: SchedulerConfig,
    pub batch_size: i64,
    pub max_retry: i32,
    pub reconcile_threshold: chrono::Duration,
    pub outbox_retention: chrono::Duration,
    pub currency: String,
    /// Public base URL the gateway calls back (IPN)
    pub api_gateway_url: String,
    /// Where the customer lands after paying
    pub frontend_base_url: String,
}

impl Config {
    /// Load `.env` then read the process environment
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Configuration("DATABASE_URL harus di-set di environment".to_string()))?;

        let redis_host = env_or("REDIS_HOST", "localhost");
        let redis_port = env_or("REDIS_PORT", "6379");
        let brokers = env::var("BUS_BROKERS")
            .ok()
            .map(|raw| parse_list(&raw))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec![format!("redis://{}:{}", redis_host, redis_port)]);

        Ok(Self {
            port: env_parse("PAYMENT_SERVICE_PORT", 3003),
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                acquire_timeout: Duration::from_secs(env_parse("DATABASE_ACQUIRE_TIMEOUT_SECONDS", 3)),
            },
            bus: BusConfig {
                brokers,
                partitions: env_parse("BUS_PARTITIONS", 4),
                publish_timeout: Duration::from_secs(env_parse("BUS_PUBLISH_TIMEOUT_SECONDS", 10)),
            },
            momo: MomoConfig {
                endpoint: env_or("MOMO_ENDPOINT", DEFAULT_MOMO_ENDPOINT),
                refund_endpoint: env_or("MOMO_REFUND_ENDPOINT", DEFAULT_MOMO_REFUND_ENDPOINT),
                query_endpoint: env_or("MOMO_QUERY_ENDPOINT", DEFAULT_MOMO_QUERY_ENDPOINT),
                partner_code: env_or("MOMO_PARTNER_CODE", ""),
                access_key: env_or("MOMO_ACCESS_KEY", ""),
                secret_key: env_or("MOMO_SECRET_KEY", ""),
                timeout: Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECONDS", 30)),
            },
            scheduler: SchedulerConfig {
                pending_interval: Duration::from_secs(env_parse("SCHEDULER_PENDING_SECONDS", 5)),
                retry_interval: Duration::from_secs(env_parse("SCHEDULER_RETRY_SECONDS", 30)),
                reconcile_interval: Duration::from_secs(env_parse("SCHEDULER_RECONCILE_SECONDS", 300)),
                cleanup_interval: Duration::from_secs(env_parse::<u64>("SCHEDULER_CLEANUP_HOURS", 24) * 3600),
                stats_interval: Duration::from_secs(env_parse("SCHEDULER_STATS_SECONDS", 300)),
            },
            batch_size: env_parse("BATCH_SIZE", 100),
            max_retry: env_parse("MAX_RETRY", 5),
            reconcile_threshold: chrono::Duration::minutes(env_parse("RECONCILE_THRESHOLD_MINUTES", 15)),
            outbox_retention: chrono::Duration::days(env_parse("OUTBOX_RETENTION_DAYS", 7)),
            currency: env_or("CURRENCY", "VND"),
            api_gateway_url: env_or("API_GATEWAY_URL", "http://localhost:3003"),
            frontend_base_url: env_or("FRONTEND_BASE_URL", "http://localhost:3000"),
        })
    }

    pub fn ipn_url(&self, provider: &str) -> String {
        ipn_url(&self.api_gateway_url, provider)
    }

    pub fn redirect_url(&self) -> String {
        format!("{}/payment/result", self.frontend_base_url.trim_end_matches('/'))
    }
}

/// Callback URL a gateway posts its IPN to
pub fn ipn_url(api_gateway_url: &str, provider: &str) -> String {
    format!(
        "{}/api/payments/ipn/{}",
        api_gateway_url.trim_end_matches('/'),
        provider.to_ascii_lowercase()
    )
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value {:?} for {}, using default {}", raw, key, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear(&["BUS_BROKERS", "BATCH_SIZE", "MAX_RETRY", "REDIS_HOST", "REDIS_PORT", "CURRENCY"]);
        env::set_var("DATABASE_URL", "postgres://localhost/payments");

        let config = Config::from_env().unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retry, 5);
        assert_eq!(config.currency, "VND");
        assert_eq!(config.scheduler.pending_interval, Duration::from_secs(5));
        assert_eq!(config.scheduler.cleanup_interval, Duration::from_secs(24 * 3600));
        assert_eq!(config.bus.brokers, vec!["redis://localhost:6379".to_string()]);
        assert_eq!(config.momo.endpoint, DEFAULT_MOMO_ENDPOINT);
    }

    #[test]
    #[serial]
    fn test_overrides_and_invalid_numbers() {
        env::set_var("DATABASE_URL", "postgres://localhost/payments");
        env::set_var("BUS_BROKERS", "redis://a:6379, redis://b:6379");
        env::set_var("BATCH_SIZE", "not-a-number");
        env::set_var("MAX_RETRY", "3");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bus.brokers.len(), 2);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retry, 3);

        clear(&["BUS_BROKERS", "BATCH_SIZE", "MAX_RETRY"]);
    }

    #[test]
    #[serial]
    fn test_ipn_url() {
        env::set_var("DATABASE_URL", "postgres://localhost/payments");
        env::set_var("API_GATEWAY_URL", "https://api.shop.test/");

        let config = Config::from_env().unwrap();
        assert_eq!(config.ipn_url("MOMO"), "https://api.shop.test/api/payments/ipn/momo");

        clear(&["API_GATEWAY_URL"]);
    }
}
