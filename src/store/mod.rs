//! store/mod.rs
//!
//! Долговечные хранилища ядра: события, бронирования, лист ожидания.
//!
//! Контракты объявлены трейтами, чтобы сервисы запроса и фоновые воркеры
//! делили одни интерфейсы; реализации на Postgres живут в подмодулях.
//! Составные переходы (финализация, отмена, истечение) - это методы-транзакции:
//! блокировка строки события берется первой, затем строки бронирования,
//! поэтому финализация и отмена не могут взаимно заблокироваться.

pub mod bookings;
pub mod events;
pub mod waitlist;

pub use bookings::PgBookingStore;
pub use events::PgEventStore;
pub use waitlist::PgWaitlistStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CoreResult;
use crate::models::{Booking, BookingStatus, Event, EventStatus, WaitlistEntry};

/// Счетчики события для реконсиляции.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct EventCounts {
    pub id: Uuid,
    pub capacity: i32,
    pub reserved: i32,
}

/// Результат транзакции финализации.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Бронирование подтверждено, `reserved` увеличен на число мест.
    Booked { seats: i32 },
    /// Вместимость исчерпана: бронирование переведено в waitlisted,
    /// удержанные токены подлежат возврату.
    SoldOut { seats: i32 },
    /// Строка уже ушла из pending (отмена, истечение, повторная доставка).
    AlreadyResolved { status: BookingStatus },
}

/// Результат транзакции отмены.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub booking: Booking,
    /// Статус до перехода; по нему решается возврат токенов и promotion.
    pub previous: BookingStatus,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get(&self, id: Uuid) -> CoreResult<Option<Event>>;

    async fn update_status(&self, id: Uuid, status: EventStatus) -> CoreResult<()>;

    /// `(capacity, reserved)` всех событий - вход реконсилятора.
    async fn counts(&self) -> CoreResult<Vec<EventCounts>>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Вставляет бронирование в `pending`. При гонке по ключу идемпотентности
    /// возвращает выигравшую строку и `false` во втором элементе.
    async fn create_pending(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        seats: &[String],
        idempotency_key: Option<&str>,
    ) -> CoreResult<(Booking, bool)>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn get_by_idempotency_key(&self, key: &str) -> CoreResult<Option<Booking>>;

    /// Транзакция финализации: блокировка строки события, compound-and
    /// перевод `pending -> booked` и инкремент `reserved`, либо
    /// `pending -> waitlisted` при исчерпанной вместимости.
    async fn finalize(&self, booking_id: Uuid, event_id: Uuid) -> CoreResult<FinalizeOutcome>;

    /// Транзакция отмены: перевод в `cancelled`, декремент `reserved`,
    /// если бронирование было `booked`. Повторная отмена - no-op.
    async fn cancel(&self, booking_id: Uuid) -> CoreResult<CancelOutcome>;

    /// Compound-and перевод `pending -> expired`; `false` - гонка проиграна.
    async fn expire_pending(&self, booking_id: Uuid) -> CoreResult<bool>;

    /// Просроченные pending-строки для свипера, отсортированы по возрасту.
    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Booking>>;

    /// Сумма мест в незавершенных pending-бронированиях события.
    async fn pending_seat_count(&self, event_id: Uuid) -> CoreResult<i64>;

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<Booking>>;
}

#[async_trait]
pub trait WaitlistStore: Send + Sync {
    /// Ставит пользователя в хвост очереди события и возвращает позицию.
    /// Вставки сериализуются по событию, позиции строго возрастают.
    async fn enqueue(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<i32>;

    /// Помечает все записи пользователя как opted_out; идемпотентно.
    async fn opt_out(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<()>;

    /// Голова очереди: минимальная позиция среди не-opted-out записей.
    async fn next_active(&self, event_id: Uuid) -> CoreResult<Option<WaitlistEntry>>;

    async fn remove(&self, entry_id: Uuid) -> CoreResult<()>;

    async fn count(&self, event_id: Uuid) -> CoreResult<i64>;

    async fn list(
        &self,
        event_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<WaitlistEntry>>;
}
