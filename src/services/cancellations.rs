//! cancellations.rs
//!
//! Сервис отмены (C6): перевод брони в `cancelled`, возврат токенов
//! и продвижение головы листа ожидания через общий конвейер допуска.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{Booking, BookingStatus};
use crate::queue::{FinalizePayload, FinalizeQueue};
use crate::store::{BookingStore, WaitlistStore};
use crate::tokens::TokenBucket;

pub struct CancellationService {
    bookings: Arc<dyn BookingStore>,
    waitlist: Arc<dyn WaitlistStore>,
    tokens: Arc<dyn TokenBucket>,
    queue: Arc<dyn FinalizeQueue>,
    hold_ttl: Duration,
}

impl CancellationService {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        waitlist: Arc<dyn WaitlistStore>,
        tokens: Arc<dyn TokenBucket>,
        queue: Arc<dyn FinalizeQueue>,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            bookings,
            waitlist,
            tokens,
            queue,
            hold_ttl,
        }
    }

    pub async fn cancel(&self, booking_id: Uuid) -> CoreResult<Booking> {
        // Транзакция: блокировка строк, переход в cancelled, декремент
        // reserved для booked-брони. Все компенсации - вне транзакции.
        let outcome = self.bookings.cancel(booking_id).await?;
        let booking = outcome.booking;
        let previous = outcome.previous;

        if matches!(
            previous,
            BookingStatus::Cancelled | BookingStatus::Expired
        ) {
            // Повторная отмена - идемпотентный успех без побочных эффектов.
            return Ok(booking);
        }

        let seats = booking.seat_count();
        if matches!(previous, BookingStatus::Pending | BookingStatus::Booked) {
            if let Err(e) = self.tokens.release(booking.event_id, seats).await {
                // Недовозврат выровняет реконсилятор.
                warn!(
                    "token release failed after cancel of {}: {}",
                    booking.id, e
                );
            }
            if let Err(e) = self.tokens.clear_hold(booking.event_id, booking.id).await {
                warn!("failed to clear hold for {}: {}", booking.id, e);
            }
            if let Err(e) = self
                .promote_next(booking.event_id, &booking.seats.0)
                .await
            {
                // Запись осталась в очереди, следующая отмена повторит попытку.
                warn!(
                    "waitlist promotion failed for event {}: {}",
                    booking.event_id, e
                );
            }
        }

        Ok(booking)
    }

    /// Продвигает голову листа ожидания: освободившийся бюджет мест
    /// переходит следующему не-opted-out пользователю тем же путем,
    /// что и обычная заявка (токены -> pending -> холд -> сообщение).
    async fn promote_next(&self, event_id: Uuid, seats: &[String]) -> CoreResult<()> {
        let Some(entry) = self.waitlist.next_active(event_id).await? else {
            return Ok(());
        };

        let seat_count = seats.len() as i32;
        if !self.tokens.reserve(event_id, seat_count).await? {
            // Токены уже разобраны - оставляем запись на месте.
            return Ok(());
        }

        let created = self
            .bookings
            .create_pending(entry.user_id, event_id, seats, None)
            .await;
        let booking = match created {
            Ok((booking, _)) => booking,
            Err(e) => {
                if let Err(re) = self.tokens.release(event_id, seat_count).await {
                    warn!("token release failed during promotion: {}", re);
                }
                return Err(e);
            }
        };

        if let Err(e) = self
            .tokens
            .set_hold(event_id, booking.id, self.hold_ttl)
            .await
        {
            warn!("failed to set hold for promoted booking {}: {}", booking.id, e);
        }

        let payload = FinalizePayload::new(
            booking.id,
            event_id,
            entry.user_id,
            seats.to_vec(),
            None,
        );
        if let Err(e) = self.queue.publish(&payload).await {
            error!(
                "finalize publish failed for promoted booking {}: {}",
                booking.id, e
            );
        }

        self.waitlist.remove(entry.id).await?;
        info!(
            "promoted user {} from waitlist position {} on event {}",
            entry.user_id, entry.position, event_id
        );
        Ok(())
    }
}
