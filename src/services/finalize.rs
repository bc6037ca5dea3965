//! finalize.rs
//!
//! Логика обработки сообщений `finalize_booking` (C7), отделенная от
//! Kafka-цикла, чтобы ее можно было гонять в тестах на фейковых хранилищах.
//!
//! Временные ошибки ретраятся с экспоненциальным бэкоффом, постоянные
//! уходят в DLQ вместе с исходным сообщением. Нарушение инварианта
//! вместимости - фатально: воркер останавливается.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::queue::{FinalizePayload, FinalizeQueue};
use crate::store::{BookingStore, EventStore, FinalizeOutcome, WaitlistStore};
use crate::tokens::TokenBucket;

pub struct FinalizeService {
    bookings: Arc<dyn BookingStore>,
    events: Arc<dyn EventStore>,
    waitlist: Arc<dyn WaitlistStore>,
    tokens: Arc<dyn TokenBucket>,
    queue: Arc<dyn FinalizeQueue>,
    max_retries: u32,
    backoff: Duration,
}

impl FinalizeService {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        events: Arc<dyn EventStore>,
        waitlist: Arc<dyn WaitlistStore>,
        tokens: Arc<dyn TokenBucket>,
        queue: Arc<dyn FinalizeQueue>,
        max_retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            bookings,
            events,
            waitlist,
            tokens,
            queue,
            max_retries,
            backoff,
        }
    }

    /// Полный цикл обработки одного сообщения: разбор, ретраи, DLQ.
    /// `Err` возвращается только при фатальном нарушении инварианта.
    pub async fn process(&self, key: &[u8], raw: &[u8]) -> CoreResult<()> {
        let payload: FinalizePayload = match serde_json::from_slice(raw) {
            Ok(p) => p,
            Err(e) => {
                // Неразбираемое сообщение неретраябельно - сразу в DLQ.
                warn!("undecodable finalize message: {}", e);
                self.dead_letter(key, raw).await;
                return Ok(());
            }
        };

        let mut attempt: u32 = 0;
        loop {
            match self.handle(&payload).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        "finalize of booking {} failed (attempt {}), retrying in {:?}: {}",
                        payload.booking_id, attempt, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e @ CoreError::Fatal(_)) => {
                    error!(
                        "fatal error finalizing booking {}: {}",
                        payload.booking_id, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    error!(
                        "finalize of booking {} failed permanently: {}",
                        payload.booking_id, e
                    );
                    self.dead_letter(key, raw).await;
                    return Ok(());
                }
            }
        }
    }

    /// Одна попытка финализации.
    pub async fn handle(&self, payload: &FinalizePayload) -> CoreResult<FinalizeOutcome> {
        let outcome = self
            .bookings
            .finalize(payload.booking_id, payload.event_id)
            .await?;

        match outcome {
            FinalizeOutcome::Booked { seats } => {
                if let Err(e) = self
                    .tokens
                    .clear_hold(payload.event_id, payload.booking_id)
                    .await
                {
                    warn!("failed to clear hold for {}: {}", payload.booking_id, e);
                }
                // Сумма к оплате - для внешнего слоя уведомлений/платежей.
                if let Ok(Some(event)) = self.events.get(payload.event_id).await {
                    let amount = event.ticket_price * f64::from(seats);
                    info!(
                        booking_id = %payload.booking_id,
                        event_id = %payload.event_id,
                        amount,
                        "booking finalized"
                    );
                }
            }
            FinalizeOutcome::SoldOut { seats } => {
                // Допуск выдал фантомные токены - возвращаем их и снимаем холд.
                if let Err(e) = self.tokens.release(payload.event_id, seats).await {
                    warn!(
                        "token release failed for sold-out event {}: {}",
                        payload.event_id, e
                    );
                }
                if let Err(e) = self
                    .tokens
                    .clear_hold(payload.event_id, payload.booking_id)
                    .await
                {
                    warn!("failed to clear hold for {}: {}", payload.booking_id, e);
                }
                // Пользователь встает в очередь, чтобы promotion его нашел.
                match self
                    .waitlist
                    .enqueue(payload.event_id, payload.user_id)
                    .await
                {
                    Ok(position) => info!(
                        booking_id = %payload.booking_id,
                        position,
                        "booking waitlisted at finalization"
                    ),
                    Err(e) => warn!(
                        "waitlist enqueue failed for booking {}: {}",
                        payload.booking_id, e
                    ),
                }
            }
            FinalizeOutcome::AlreadyResolved { status } => {
                // Повторная доставка или проигранная гонка - молча подтверждаем.
                debug!(
                    booking_id = %payload.booking_id,
                    ?status,
                    "finalize message for already resolved booking"
                );
            }
        }

        Ok(outcome)
    }

    async fn dead_letter(&self, key: &[u8], raw: &[u8]) {
        if let Err(e) = self.queue.publish_dead_letter(key, raw).await {
            error!("DLQ publish failed: {}", e);
        }
    }
}
