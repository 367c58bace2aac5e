// /shop-platform/services/order-service/src/config.rs

use std::{env, str::FromStr, time::Duration};

use crate::utils::error::{AppError, AppResult};

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
    /// Member name inside the consumer group
    pub consumer_name: String,
    /// Partitions this instance reads; `None` reads all of them
    pub assigned_partitions: Option<Vec<u32>>,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Inbox processor cadence for fresh rows
    pub pending_interval: Duration,
    /// Inbox processor cadence for rows that already failed once
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
    pub scheduler: SchedulerConfig,
    pub batch_size: i64,
    pub max_retry: i32,
    pub reconcile_threshold: chrono::Duration,
    pub inbox_retention: chrono::Duration,
    pub payment_service_url: String,
    pub payment_service_timeout: Duration,
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

        let assigned_partitions = match env::var("BUS_ASSIGNED_PARTITIONS") {
            Ok(raw) => Some(
                parse_list(&raw)
                    .iter()
                    .map(|p| {
                        p.parse::<u32>().map_err(|_| {
                            AppError::Configuration(format!("invalid partition {:?} in BUS_ASSIGNED_PARTITIONS", p))
                        })
                    })
                    .collect::<AppResult<Vec<u32>>>()?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            port: env_parse("ORDER_SERVICE_PORT", 3004),
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                acquire_timeout: Duration::from_secs(env_parse("DATABASE_ACQUIRE_TIMEOUT_SECONDS", 3)),
            },
            bus: BusConfig {
                brokers,
                partitions: env_parse("BUS_PARTITIONS", 4),
                publish_timeout: Duration::from_secs(env_parse("BUS_PUBLISH_TIMEOUT_SECONDS", 10)),
                consumer_name: env_or("BUS_CONSUMER_NAME", "order-service-1"),
                assigned_partitions,
                poll_interval: Duration::from_millis(env_parse("BUS_POLL_INTERVAL_MS", 1000)),
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
            inbox_retention: chrono::Duration::days(env_parse("INBOX_RETENTION_DAYS", 7)),
            payment_service_url: env_or("PAYMENT_SERVICE_URL", "http://localhost:3003"),
            payment_service_timeout: Duration::from_secs(env_parse("PAYMENT_SERVICE_TIMEOUT_SECONDS", 10)),
        })
    }
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

    #[test]
    #[serial]
    fn test_defaults() {
        for key in ["BUS_BROKERS", "BUS_ASSIGNED_PARTITIONS", "MAX_RETRY", "ORDER_SERVICE_PORT"] {
            env::remove_var(key);
        }
        env::set_var("DATABASE_URL", "postgres://localhost/orders");

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 3004);
        assert_eq!(config.max_retry, 5);
        assert_eq!(config.bus.assigned_partitions, None);
        assert_eq!(config.scheduler.retry_interval, Duration::from_secs(30));
        assert_eq!(config.reconcile_threshold, chrono::Duration::minutes(15));
        assert_eq!(config.inbox_retention, chrono::Duration::days(7));
    }

    #[test]
    #[serial]
    fn test_assigned_partitions() {
        env::set_var("DATABASE_URL", "postgres://localhost/orders");
        env::set_var("BUS_ASSIGNED_PARTITIONS", "0, 2");
        assert_eq!(Config::from_env().unwrap().bus.assigned_partitions, Some(vec![0, 2]));

        env::set_var("BUS_ASSIGNED_PARTITIONS", "0,x");
        assert!(matches!(Config::from_env(), Err(AppError::Configuration(_))));

        env::remove_var("BUS_ASSIGNED_PARTITIONS");
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        env::remove_var("DATABASE_URL");
        assert!(matches!(Config::from_env(), Err(AppError::Configuration(_))));
    }
}
