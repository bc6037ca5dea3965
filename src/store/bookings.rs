//! store/bookings.rs
//!
//! Хранилище бронирований и машина состояний
//! `pending -> booked | cancelled | waitlisted | expired`.
//!
//! Переходы выполняются compound-and обновлениями по текущему статусу:
//! из пары финализация/истечение на одной строке побеждает ровно одна,
//! проигравшая сторона видит не-pending строку и компенсирует свои токены.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{BookingStore, CancelOutcome, FinalizeOutcome};
use crate::error::{CoreError, CoreResult};
use crate::models::{Booking, BookingStatus};

const BOOKING_COLUMNS: &str =
    "id, user_id, event_id, status, seats, idempotency_key, created_at, updated_at, version";

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn create_pending(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        seats: &[String],
        idempotency_key: Option<&str>,
    ) -> CoreResult<(Booking, bool)> {
        // ON CONFLICT DO NOTHING + повторное чтение: конкурентные вставки
        // с одним ключом идемпотентности разрешаются без исключений.
        let inserted = sqlx::query_as::<_, Booking>(&format!(
            "INSERT INTO bookings (user_id, event_id, status, seats, idempotency_key) \
             VALUES ($1, $2, 'pending', $3, $4) \
             ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING \
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(user_id)
        .bind(event_id)
        .bind(Json(seats))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(booking) = inserted {
            return Ok((booking, true));
        }

        // Вставка не прошла - ключ уже занят, возвращаем строку победителя.
        let key = idempotency_key.ok_or_else(|| {
            CoreError::Fatal("insert returned no row without idempotency conflict".into())
        })?;
        let existing = self
            .get_by_idempotency_key(key)
            .await?
            .ok_or(CoreError::NotFound("booking"))?;
        Ok((existing, false))
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn get_by_idempotency_key(&self, key: &str) -> CoreResult<Option<Booking>> {
        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn finalize(&self, booking_id: Uuid, event_id: Uuid) -> CoreResult<FinalizeOutcome> {
        let mut tx = self.pool.begin().await?;

        // Блокировка строки события сериализует финализации и отмены.
        let counts: Option<(i32, i32)> =
            sqlx::query_as("SELECT capacity, reserved FROM events WHERE id = $1 FOR UPDATE")
                .bind(event_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((capacity, reserved)) = counts else {
            return Err(CoreError::NotFound("event"));
        };
        if reserved > capacity {
            return Err(CoreError::Fatal(format!(
                "event {event_id}: reserved {reserved} exceeds capacity {capacity}"
            )));
        }

        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(booking) = booking else {
            return Err(CoreError::NotFound("booking"));
        };

        if booking.status != BookingStatus::Pending {
            // Строку уже увели (отмена/истечение/повторная доставка) - ничего не делаем.
            tx.commit().await?;
            return Ok(FinalizeOutcome::AlreadyResolved {
                status: booking.status,
            });
        }

        let seats = booking.seat_count();
        if reserved + seats > capacity {
            // Допуск переоценил остаток: база авторитетна, бронь - в лист ожидания.
            sqlx::query(
                "UPDATE bookings SET status = 'waitlisted', updated_at = now(), \
                 version = version + 1 WHERE id = $1 AND status = 'pending'",
            )
            .bind(booking_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(FinalizeOutcome::SoldOut { seats });
        }

        sqlx::query(
            "UPDATE bookings SET status = 'booked', updated_at = now(), \
             version = version + 1 WHERE id = $1 AND status = 'pending'",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE events SET reserved = reserved + $2, updated_at = now() WHERE id = $1")
            .bind(event_id)
            .bind(seats)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(FinalizeOutcome::Booked { seats })
    }

    async fn cancel(&self, booking_id: Uuid) -> CoreResult<CancelOutcome> {
        // event_id читается заранее: блокировки берутся в порядке
        // событие -> бронирование, как и в финализации.
        let event_id: Option<Uuid> =
            sqlx::query_scalar("SELECT event_id FROM bookings WHERE id = $1")
                .bind(booking_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(event_id) = event_id else {
            return Err(CoreError::NotFound("booking"));
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT 1 FROM events WHERE id = $1 FOR UPDATE")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(mut booking) = booking else {
            return Err(CoreError::NotFound("booking"));
        };

        let previous = booking.status;
        if matches!(
            previous,
            BookingStatus::Cancelled | BookingStatus::Expired
        ) {
            // Повторная отмена и отмена истекшей брони - no-op.
            tx.commit().await?;
            return Ok(CancelOutcome { booking, previous });
        }

        sqlx::query(
            "UPDATE bookings SET status = 'cancelled', updated_at = now(), \
             version = version + 1 WHERE id = $1",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        if previous == BookingStatus::Booked {
            // Только подтвержденная бронь занимала места в базе.
            sqlx::query(
                "UPDATE events SET reserved = GREATEST(reserved - $2, 0), \
                 updated_at = now() WHERE id = $1",
            )
            .bind(event_id)
            .bind(booking.seat_count())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        booking.status = BookingStatus::Cancelled;
        Ok(CancelOutcome { booking, previous })
    }

    async fn expire_pending(&self, booking_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'expired', updated_at = now(), \
             version = version + 1 WHERE id = $1 AND status = 'pending'",
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE status = 'pending' AND created_at < $1 \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(bookings)
    }

    async fn pending_seat_count(&self, event_id: Uuid) -> CoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(jsonb_array_length(seats)), 0)::BIGINT \
             FROM bookings WHERE event_id = $1 AND status = 'pending'",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<Booking>> {
        let bookings = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(bookings)
    }
}
