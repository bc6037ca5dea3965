//! finalizer.rs
//!
//! Kafka-цикл воркера финализации (C7).
//!
//! Сообщения партиционированы по `event_id`; параллелизм ограничен
//! семафором, смещение коммитится только после обработки сообщения
//! (at-least-once, повторная доставка разрешается compound-and
//! переходами в хранилище).

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::error::{CoreError, CoreResult};
use crate::services::FinalizeService;

pub struct FinalizerWorker {
    consumer: Arc<StreamConsumer>,
    service: Arc<FinalizeService>,
    permits: Arc<Semaphore>,
    halted: Arc<AtomicBool>,
}

impl FinalizerWorker {
    pub fn from_config(
        kafka: &KafkaConfig,
        service: Arc<FinalizeService>,
        concurrency: usize,
    ) -> CoreResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &kafka.consumer_group_id)
            .set("bootstrap.servers", &kafka.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| CoreError::Queue(e.to_string()))?;
        consumer
            .subscribe(&[kafka.finalize_topic.as_str()])
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            service,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            halted: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> CoreResult<()> {
        info!("finalizer worker started");
        loop {
            if self.halted.load(Ordering::SeqCst) {
                error!("finalizer worker halted after invariant violation");
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.consumer.recv() => received,
            };
            let message = match received {
                Ok(m) => m.detach(),
                Err(e) => {
                    warn!("kafka receive error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CoreError::Queue(e.to_string()))?;
            let consumer = Arc::clone(&self.consumer);
            let service = Arc::clone(&self.service);
            let halted = Arc::clone(&self.halted);

            tokio::spawn(async move {
                let _permit = permit;
                let key = message.key().unwrap_or_default();
                let raw = message.payload().unwrap_or_default();

                if let Err(e) = service.process(key, raw).await {
                    // Фатальное нарушение инварианта: смещение не подтверждаем,
                    // воркер останавливается на следующем витке.
                    error!(
                        "finalizer halting at {}:{}: {}",
                        message.partition(),
                        message.offset(),
                        e
                    );
                    halted.store(true, Ordering::SeqCst);
                    return;
                }

                let mut offsets = TopicPartitionList::new();
                let added = offsets.add_partition_offset(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset() + 1),
                );
                if added.is_ok() {
                    if let Err(e) = consumer.commit(&offsets, CommitMode::Async) {
                        warn!("offset commit failed: {}", e);
                    }
                }
            });
        }
        info!("finalizer worker stopped");
        Ok(())
    }
}
