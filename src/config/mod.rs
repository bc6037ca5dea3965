use serde::Deserialize;
use std::env;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub reservation: ReservationConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub rust_log: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Настройки Kafka
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub consumer_group_id: String,
    pub finalize_topic: String,
    pub dlq_topic: String,
}

// Настройки конвейера бронирования: TTL холда, интервалы фоновых циклов,
// параллелизм и ретраи воркера финализации.
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    pub hold_ttl_secs: u64,
    pub sweeper_interval_secs: u64,
    pub sweeper_grace_secs: u64,
    pub sweeper_batch_size: i64,
    pub reconciler_interval_secs: u64,
    pub worker_concurrency: usize,
    pub finalize_max_retries: u32,
    pub finalize_backoff_ms: u64,
}

impl ReservationConfig {
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_ttl_secs)
    }

    pub fn sweeper_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper_interval_secs)
    }

    pub fn sweeper_grace(&self) -> Duration {
        Duration::from_secs(self.sweeper_grace_secs)
    }

    pub fn reconciler_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler_interval_secs)
    }

    pub fn finalize_backoff(&self) -> Duration {
        Duration::from_millis(self.finalize_backoff_ms)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "reservation_core=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            kafka: KafkaConfig {
                brokers: env::var("KAFKA_BROKERS").expect("KAFKA_BROKERS must be set"),
                consumer_group_id: env::var("KAFKA_CONSUMER_GROUP_ID")
                    .unwrap_or_else(|_| "reservation-finalizer".to_string()),
                finalize_topic: env::var("KAFKA_FINALIZE_TOPIC")
                    .unwrap_or_else(|_| "bookings".to_string()),
                dlq_topic: env::var("KAFKA_DLQ_TOPIC")
                    .unwrap_or_else(|_| "bookings-dlq".to_string()),
            },
            reservation: ReservationConfig {
                hold_ttl_secs: env::var("HOLD_TTL_SECS")
                    .unwrap_or_else(|_| "180".to_string())
                    .parse()
                    .expect("HOLD_TTL_SECS must be a valid number"),
                sweeper_interval_secs: env::var("SWEEPER_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("SWEEPER_INTERVAL_SECS must be a valid number"),
                sweeper_grace_secs: env::var("SWEEPER_GRACE_SECS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .expect("SWEEPER_GRACE_SECS must be a valid number"),
                sweeper_batch_size: env::var("SWEEPER_BATCH_SIZE")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .expect("SWEEPER_BATCH_SIZE must be a valid number"),
                reconciler_interval_secs: env::var("RECONCILER_INTERVAL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .expect("RECONCILER_INTERVAL_SECS must be a valid number"),
                worker_concurrency: env::var("WORKER_CONCURRENCY")
                    .unwrap_or_else(|_| "8".to_string())
                    .parse()
                    .expect("WORKER_CONCURRENCY must be a valid number"),
                finalize_max_retries: env::var("FINALIZE_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .expect("FINALIZE_MAX_RETRIES must be a valid number"),
                finalize_backoff_ms: env::var("FINALIZE_BACKOFF_MS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("FINALIZE_BACKOFF_MS must be a valid number"),
            },
        }
    }
}
