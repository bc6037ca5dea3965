//! queue.rs
//!
//! Очередь финализации бронирований поверх Kafka-совместимого брокера.
//!
//! Сообщения партиционируются по `event_id`, поэтому финализация двух
//! бронирований одного события сериализована в пределах партиции.
//! Необработанные сообщения уходят в DLQ-топик в неизменном виде.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::KafkaConfig;
use crate::error::{CoreError, CoreResult};

pub const FINALIZE_MESSAGE_TYPE: &str = "finalize_booking";

/// Формат сообщения `finalize_booking` (JSON, ключ партиции - `event_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub booking_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub seats: Vec<String>,
    pub idempotency_key: Option<String>,
}

impl FinalizePayload {
    pub fn new(
        booking_id: Uuid,
        event_id: Uuid,
        user_id: Uuid,
        seats: Vec<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            kind: FINALIZE_MESSAGE_TYPE.to_string(),
            booking_id,
            event_id,
            user_id,
            seats,
            idempotency_key,
        }
    }
}

/// Публикация сообщений финализации. Сервисы зависят от интерфейса,
/// чтобы путь запроса и воркер делили один контракт.
#[async_trait]
pub trait FinalizeQueue: Send + Sync {
    async fn publish(&self, payload: &FinalizePayload) -> CoreResult<()>;

    /// Отправляет неразобранное сообщение в DLQ как есть.
    async fn publish_dead_letter(&self, key: &[u8], raw: &[u8]) -> CoreResult<()>;
}

pub struct KafkaFinalizeQueue {
    producer: FutureProducer,
    topic: String,
    dlq_topic: String,
}

impl KafkaFinalizeQueue {
    pub fn from_config(cfg: &KafkaConfig) -> CoreResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        Ok(Self {
            producer,
            topic: cfg.finalize_topic.clone(),
            dlq_topic: cfg.dlq_topic.clone(),
        })
    }

    async fn send(&self, topic: &str, key: &[u8], body: &[u8]) -> CoreResult<()> {
        let record = FutureRecord::to(topic).key(key).payload(body);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| CoreError::Queue(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl FinalizeQueue for KafkaFinalizeQueue {
    async fn publish(&self, payload: &FinalizePayload) -> CoreResult<()> {
        let body = serde_json::to_vec(payload)?;
        let key = payload.event_id.to_string();
        self.send(&self.topic, key.as_bytes(), &body).await
    }

    async fn publish_dead_letter(&self, key: &[u8], raw: &[u8]) -> CoreResult<()> {
        self.send(&self.dlq_topic, key, raw).await
    }
}
