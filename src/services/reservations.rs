//! reservations.rs
//!
//! Сервис допуска (C5): конвейер приема заявки на бронирование.
//!
//! Порядок шагов фиксирован: предварительные проверки по событию ->
//! идемпотентность -> списание токенов -> pending-строка -> холд ->
//! сообщение финализации. Сервис никогда не трогает `events.reserved` -
//! это делает только воркер финализации под блокировкой строки события.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Booking, BookingStatus, EventStatus};
use crate::queue::{FinalizePayload, FinalizeQueue};
use crate::store::{BookingStore, EventStore, WaitlistStore};
use crate::tokens::TokenBucket;

/// Итог приема заявки, видимый внешнему слою.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReservationOutcome {
    /// Заявка принята: либо свежая pending-строка, либо повтор по ключу
    /// идемпотентности с текущим статусом существующей брони.
    Accepted {
        booking_id: Uuid,
        booking_status: BookingStatus,
    },
    /// Токенов не хватило - пользователь поставлен в лист ожидания.
    Waitlisted { position: i32 },
}

pub struct ReservationService {
    events: Arc<dyn EventStore>,
    bookings: Arc<dyn BookingStore>,
    waitlist: Arc<dyn WaitlistStore>,
    tokens: Arc<dyn TokenBucket>,
    queue: Arc<dyn FinalizeQueue>,
    hold_ttl: Duration,
}

impl ReservationService {
    pub fn new(
        events: Arc<dyn EventStore>,
        bookings: Arc<dyn BookingStore>,
        waitlist: Arc<dyn WaitlistStore>,
        tokens: Arc<dyn TokenBucket>,
        queue: Arc<dyn FinalizeQueue>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            events,
            bookings,
            waitlist,
            tokens,
            queue,
            hold_ttl,
        }
    }

    pub async fn reserve(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        seats: Vec<String>,
        idempotency_key: Option<String>,
    ) -> CoreResult<ReservationOutcome> {
        // --- Предварительные проверки: отказ до похода в токен-бакет ---
        let event = self
            .events
            .get(event_id)
            .await?
            .ok_or(CoreError::NotFound("event"))?;

        let now = Utc::now();
        if event.status == EventStatus::Upcoming && now > event.end_time {
            // Событие закончилось, но статус еще не обновлен - фиксируем.
            self.events
                .update_status(event_id, EventStatus::Expired)
                .await?;
            return Err(CoreError::EventClosed);
        }
        if event.is_closed(now) {
            return Err(CoreError::EventClosed);
        }

        let seat_count = seats.len() as i32;
        if seat_count == 0 || seat_count > event.max_per_booking {
            return Err(CoreError::OverLimit {
                max: event.max_per_booking,
            });
        }

        // --- Идемпотентность: повтор с тем же ключом отдает прежнюю бронь ---
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.bookings.get_by_idempotency_key(key).await? {
                if existing.user_id != user_id || existing.event_id != event_id {
                    return Err(CoreError::Conflict);
                }
                return Ok(ReservationOutcome::Accepted {
                    booking_id: existing.id,
                    booking_status: existing.status,
                });
            }
        }

        // --- Допуск: атомарное списание токенов ---
        if !self.tokens.reserve(event_id, seat_count).await? {
            let position = self.waitlist.enqueue(event_id, user_id).await?;
            return Ok(ReservationOutcome::Waitlisted { position });
        }

        let created = self
            .bookings
            .create_pending(user_id, event_id, &seats, idempotency_key.as_deref())
            .await;
        let (booking, inserted) = match created {
            Ok(v) => v,
            Err(e) => {
                // Компенсация: строка не появилась, токены возвращаются.
                self.release_quietly(event_id, seat_count).await;
                return Err(e);
            }
        };

        if !inserted {
            // Гонка по ключу идемпотентности проиграна конкурентной вставке.
            self.release_quietly(event_id, seat_count).await;
            if booking.user_id != user_id || booking.event_id != event_id {
                return Err(CoreError::Conflict);
            }
            return Ok(ReservationOutcome::Accepted {
                booking_id: booking.id,
                booking_status: booking.status,
            });
        }

        if let Err(e) = self
            .tokens
            .set_hold(event_id, booking.id, self.hold_ttl)
            .await
        {
            // Без холда бронь все равно накроет свипер по created_at.
            warn!("failed to set hold for booking {}: {}", booking.id, e);
        }

        let payload =
            FinalizePayload::new(booking.id, event_id, user_id, seats, idempotency_key);
        if let Err(e) = self.queue.publish(&payload).await {
            // TTL холда гарантирует, что свипер вернет токены, если
            // сообщение так и не дойдет до воркера.
            error!("finalize publish failed for booking {}: {}", booking.id, e);
        }

        Ok(ReservationOutcome::Accepted {
            booking_id: booking.id,
            booking_status: BookingStatus::Pending,
        })
    }

    /// Текущий статус брони - контракт `getStatus` для внешнего слоя.
    pub async fn status(&self, booking_id: Uuid) -> CoreResult<Booking> {
        self.bookings
            .get(booking_id)
            .await?
            .ok_or(CoreError::NotFound("booking"))
    }

    pub async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<Booking>> {
        self.bookings.list_by_user(user_id, limit, offset).await
    }

    async fn release_quietly(&self, event_id: Uuid, n: i32) {
        if let Err(e) = self.tokens.release(event_id, n).await {
            // Реконсилятор выровняет счетчик на следующем цикле.
            warn!("token release failed for event {}: {}", event_id, e);
        }
    }
}
