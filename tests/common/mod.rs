//! Общая обвязка интеграционных тестов: in-memory реализации
//! интерфейсов хранилищ, токен-бакета и очереди финализации.
//! Состояние каждого фейка живет под одним мьютексом, что эмулирует
//! атомарность транзакций настоящих реализаций.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use reservation_core::error::{CoreError, CoreResult};
use reservation_core::models::{Booking, BookingStatus, Event, EventStatus, WaitlistEntry};
use reservation_core::queue::{FinalizePayload, FinalizeQueue};
use reservation_core::services::{
    CancellationService, FinalizeService, ReservationService, WaitlistService,
};
use reservation_core::store::{
    BookingStore, CancelOutcome, EventCounts, EventStore, FinalizeOutcome, WaitlistStore,
};
use reservation_core::tokens::TokenBucket;
use reservation_core::workers::{HoldSweeper, Reconciler};

pub const HOLD_TTL: Duration = Duration::from_secs(180);
pub const SWEEP_GRACE: Duration = Duration::from_secs(15);
pub const MAX_RETRIES: u32 = 3;

fn transient() -> CoreError {
    CoreError::Database(sqlx::Error::PoolClosed)
}

// === Хранилище (события + бронирования + лист ожидания) ===

#[derive(Default)]
struct StoreState {
    events: HashMap<Uuid, Event>,
    bookings: HashMap<Uuid, Booking>,
    waitlist: Vec<WaitlistEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    /// Сколько ближайших вызовов `finalize` провалить временной ошибкой.
    pub fail_finalize: AtomicU32,
    /// Один раз спрятать строку от `get_by_idempotency_key` - имитация
    /// гонки конкурентной вставки по одному ключу.
    pub hide_idempotency_once: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_event(&self, capacity: i32) -> Uuid {
        self.insert_event_with(capacity, |_| {})
    }

    pub fn insert_event_with(&self, capacity: i32, tweak: impl FnOnce(&mut Event)) -> Uuid {
        let now = Utc::now();
        let mut event = Event {
            id: Uuid::new_v4(),
            name: "Concert".to_string(),
            venue: "Main hall".to_string(),
            start_time: now + ChronoDuration::hours(1),
            end_time: now + ChronoDuration::hours(4),
            capacity,
            reserved: 0,
            status: EventStatus::Upcoming,
            ticket_price: 25.0,
            max_per_booking: 10,
            updated_at: now,
        };
        tweak(&mut event);
        let id = event.id;
        self.state.lock().unwrap().events.insert(id, event);
        id
    }

    pub fn event(&self, id: Uuid) -> Event {
        self.state.lock().unwrap().events[&id].clone()
    }

    pub fn booking(&self, id: Uuid) -> Booking {
        self.state.lock().unwrap().bookings[&id].clone()
    }

    pub fn booking_count(&self) -> usize {
        self.state.lock().unwrap().bookings.len()
    }

    pub fn set_reserved(&self, event_id: Uuid, reserved: i32) {
        self.state
            .lock()
            .unwrap()
            .events
            .get_mut(&event_id)
            .unwrap()
            .reserved = reserved;
    }

    /// Вставляет pending-строку напрямую, минуя сервис допуска.
    pub fn insert_pending(&self, user_id: Uuid, event_id: Uuid, seats: &[&str]) -> Uuid {
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            status: BookingStatus::Pending,
            seats: Json(seats.iter().map(|s| s.to_string()).collect()),
            idempotency_key: None,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        let id = booking.id;
        self.state.lock().unwrap().bookings.insert(id, booking);
        id
    }

    pub fn backdate_booking(&self, booking_id: Uuid, by: Duration) {
        let mut state = self.state.lock().unwrap();
        let booking = state.bookings.get_mut(&booking_id).unwrap();
        booking.created_at -= ChronoDuration::seconds(by.as_secs() as i64);
    }

    pub fn waitlist_len(&self, event_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .waitlist
            .iter()
            .filter(|w| w.event_id == event_id)
            .count()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn get(&self, id: Uuid) -> CoreResult<Option<Event>> {
        Ok(self.state.lock().unwrap().events.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: EventStatus) -> CoreResult<()> {
        if let Some(event) = self.state.lock().unwrap().events.get_mut(&id) {
            event.status = status;
            event.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn counts(&self) -> CoreResult<Vec<EventCounts>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .values()
            .map(|e| EventCounts {
                id: e.id,
                capacity: e.capacity,
                reserved: e.reserved,
            })
            .collect())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn create_pending(
        &self,
        user_id: Uuid,
        event_id: Uuid,
        seats: &[String],
        idempotency_key: Option<&str>,
    ) -> CoreResult<(Booking, bool)> {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = idempotency_key {
            let existing = state
                .bookings
                .values()
                .find(|b| b.idempotency_key.as_deref() == Some(key))
                .cloned();
            if let Some(existing) = existing {
                return Ok((existing, false));
            }
        }
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            status: BookingStatus::Pending,
            seats: Json(seats.to_vec()),
            idempotency_key: idempotency_key.map(str::to_string),
            created_at: now,
            updated_at: now,
            version: 1,
        };
        state.bookings.insert(booking.id, booking.clone());
        Ok((booking, true))
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.state.lock().unwrap().bookings.get(&id).cloned())
    }

    async fn get_by_idempotency_key(&self, key: &str) -> CoreResult<Option<Booking>> {
        if self.hide_idempotency_once.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .bookings
            .values()
            .find(|b| b.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn finalize(&self, booking_id: Uuid, event_id: Uuid) -> CoreResult<FinalizeOutcome> {
        if self
            .fail_finalize
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(transient());
        }

        let mut state = self.state.lock().unwrap();
        let (capacity, reserved) = {
            let event = state
                .events
                .get(&event_id)
                .ok_or(CoreError::NotFound("event"))?;
            (event.capacity, event.reserved)
        };
        if reserved > capacity {
            return Err(CoreError::Fatal(format!(
                "event {event_id}: reserved {reserved} exceeds capacity {capacity}"
            )));
        }

        let booking = state
            .bookings
            .get(&booking_id)
            .ok_or(CoreError::NotFound("booking"))?
            .clone();
        if booking.status != BookingStatus::Pending {
            return Ok(FinalizeOutcome::AlreadyResolved {
                status: booking.status,
            });
        }

        let seats = booking.seat_count();
        if reserved + seats > capacity {
            let row = state.bookings.get_mut(&booking_id).unwrap();
            row.status = BookingStatus::Waitlisted;
            row.version += 1;
            return Ok(FinalizeOutcome::SoldOut { seats });
        }

        let row = state.bookings.get_mut(&booking_id).unwrap();
        row.status = BookingStatus::Booked;
        row.version += 1;
        state.events.get_mut(&event_id).unwrap().reserved += seats;
        Ok(FinalizeOutcome::Booked { seats })
    }

    async fn cancel(&self, booking_id: Uuid) -> CoreResult<CancelOutcome> {
        let mut state = self.state.lock().unwrap();
        let booking = state
            .bookings
            .get(&booking_id)
            .ok_or(CoreError::NotFound("booking"))?
            .clone();
        let previous = booking.status;

        if matches!(
            previous,
            BookingStatus::Cancelled | BookingStatus::Expired
        ) {
            return Ok(CancelOutcome { booking, previous });
        }

        let seats = booking.seat_count();
        let row = state.bookings.get_mut(&booking_id).unwrap();
        row.status = BookingStatus::Cancelled;
        row.version += 1;
        let booking = row.clone();

        if previous == BookingStatus::Booked {
            let event = state.bookings[&booking_id].event_id;
            let event = state.events.get_mut(&event).unwrap();
            event.reserved = (event.reserved - seats).max(0);
        }
        Ok(CancelOutcome { booking, previous })
    }

    async fn expire_pending(&self, booking_id: Uuid) -> CoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.bookings.get_mut(&booking_id) {
            Some(row) if row.status == BookingStatus::Pending => {
                row.status = BookingStatus::Expired;
                row.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Booking>> {
        let state = self.state.lock().unwrap();
        let mut stale: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|b| b.created_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn pending_seat_count(&self, event_id: Uuid) -> CoreResult<i64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .bookings
            .values()
            .filter(|b| b.event_id == event_id && b.status == BookingStatus::Pending)
            .map(|b| i64::from(b.seat_count()))
            .sum())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<Booking>> {
        let state = self.state.lock().unwrap();
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl WaitlistStore for MemoryStore {
    async fn enqueue(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<i32> {
        let mut state = self.state.lock().unwrap();
        let position = state
            .waitlist
            .iter()
            .filter(|w| w.event_id == event_id)
            .map(|w| w.position)
            .max()
            .unwrap_or(0)
            + 1;
        state.waitlist.push(WaitlistEntry {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            position,
            opted_out: false,
        });
        Ok(position)
    }

    async fn opt_out(&self, event_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        for entry in state
            .waitlist
            .iter_mut()
            .filter(|w| w.event_id == event_id && w.user_id == user_id)
        {
            entry.opted_out = true;
        }
        Ok(())
    }

    async fn next_active(&self, event_id: Uuid) -> CoreResult<Option<WaitlistEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .waitlist
            .iter()
            .filter(|w| w.event_id == event_id && !w.opted_out)
            .min_by_key(|w| w.position)
            .cloned())
    }

    async fn remove(&self, entry_id: Uuid) -> CoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .waitlist
            .retain(|w| w.id != entry_id);
        Ok(())
    }

    async fn count(&self, event_id: Uuid) -> CoreResult<i64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .waitlist
            .iter()
            .filter(|w| w.event_id == event_id)
            .count() as i64)
    }

    async fn list(
        &self,
        event_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> CoreResult<Vec<WaitlistEntry>> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<WaitlistEntry> = state
            .waitlist
            .iter()
            .filter(|w| w.event_id == event_id)
            .cloned()
            .collect();
        entries.sort_by_key(|w| w.position);
        Ok(entries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

// === Токен-бакет ===

#[derive(Clone, Copy)]
struct BucketEntry {
    remaining: i32,
    capacity: Option<i32>,
}

#[derive(Default)]
pub struct MemoryTokenBucket {
    buckets: Mutex<HashMap<Uuid, BucketEntry>>,
    holds: Mutex<Vec<(Uuid, Uuid)>>,
    /// Когда взведен, `reserve` всегда отвечает отказом.
    pub freeze_reserve: AtomicBool,
}

impl MemoryTokenBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_remaining(&self, event_id: Uuid, remaining: i32) {
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets.entry(event_id).or_insert(BucketEntry {
            remaining: 0,
            capacity: None,
        });
        entry.remaining = remaining;
    }

    pub fn drop_bucket(&self, event_id: Uuid) {
        self.buckets.lock().unwrap().remove(&event_id);
    }

    pub fn remaining_now(&self, event_id: Uuid) -> Option<i32> {
        self.buckets
            .lock()
            .unwrap()
            .get(&event_id)
            .map(|e| e.remaining)
    }

    pub fn has_hold(&self, event_id: Uuid, booking_id: Uuid) -> bool {
        self.holds
            .lock()
            .unwrap()
            .contains(&(event_id, booking_id))
    }
}

#[async_trait]
impl TokenBucket for MemoryTokenBucket {
    async fn init(&self, event_id: Uuid, capacity: i32) -> CoreResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets.entry(event_id).or_insert(BucketEntry {
            remaining: capacity,
            capacity: None,
        });
        entry.capacity = Some(capacity);
        Ok(())
    }

    async fn reserve(&self, event_id: Uuid, n: i32) -> CoreResult<bool> {
        if self.freeze_reserve.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut buckets = self.buckets.lock().unwrap();
        match buckets.get_mut(&event_id) {
            Some(entry) if entry.remaining >= n => {
                entry.remaining -= n;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, event_id: Uuid, n: i32) -> CoreResult<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let entry = buckets.entry(event_id).or_insert(BucketEntry {
            remaining: 0,
            capacity: None,
        });
        entry.remaining += n;
        if let Some(capacity) = entry.capacity {
            entry.remaining = entry.remaining.min(capacity);
        }
        Ok(())
    }

    async fn remaining(&self, event_id: Uuid) -> CoreResult<Option<i32>> {
        Ok(self.remaining_now(event_id))
    }

    async fn set_hold(&self, event_id: Uuid, booking_id: Uuid, _ttl: Duration) -> CoreResult<()> {
        self.holds.lock().unwrap().push((event_id, booking_id));
        Ok(())
    }

    async fn clear_hold(&self, event_id: Uuid, booking_id: Uuid) -> CoreResult<()> {
        self.holds
            .lock()
            .unwrap()
            .retain(|h| *h != (event_id, booking_id));
        Ok(())
    }
}

// === Очередь финализации ===

#[derive(Default)]
pub struct MemoryQueue {
    published: Mutex<Vec<FinalizePayload>>,
    dead_letters: Mutex<Vec<Vec<u8>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<FinalizePayload> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }

    pub fn published_len(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn dead_letter_len(&self) -> usize {
        self.dead_letters.lock().unwrap().len()
    }
}

#[async_trait]
impl FinalizeQueue for MemoryQueue {
    async fn publish(&self, payload: &FinalizePayload) -> CoreResult<()> {
        self.published.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn publish_dead_letter(&self, _key: &[u8], raw: &[u8]) -> CoreResult<()> {
        self.dead_letters.lock().unwrap().push(raw.to_vec());
        Ok(())
    }
}

// === Сборка ядра на фейках ===

pub struct TestCore {
    pub store: Arc<MemoryStore>,
    pub tokens: Arc<MemoryTokenBucket>,
    pub queue: Arc<MemoryQueue>,
    pub reservations: ReservationService,
    pub cancellations: CancellationService,
    pub waitlists: WaitlistService,
    pub finalize: Arc<FinalizeService>,
    pub sweeper: HoldSweeper,
    pub reconciler: Reconciler,
}

pub fn core() -> TestCore {
    let store = Arc::new(MemoryStore::new());
    let tokens = Arc::new(MemoryTokenBucket::new());
    let queue = Arc::new(MemoryQueue::new());

    let reservations = ReservationService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        tokens.clone(),
        queue.clone(),
        HOLD_TTL,
    );
    let cancellations = CancellationService::new(
        store.clone(),
        store.clone(),
        tokens.clone(),
        queue.clone(),
        HOLD_TTL,
    );
    let waitlists = WaitlistService::new(store.clone(), store.clone());
    let finalize = Arc::new(FinalizeService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        tokens.clone(),
        queue.clone(),
        MAX_RETRIES,
        Duration::from_millis(1),
    ));
    let sweeper = HoldSweeper::new(
        store.clone(),
        tokens.clone(),
        HOLD_TTL,
        SWEEP_GRACE,
        Duration::from_secs(30),
        100,
    );
    let reconciler = Reconciler::new(
        store.clone(),
        store.clone(),
        tokens.clone(),
        Duration::from_secs(300),
    );

    TestCore {
        store,
        tokens,
        queue,
        reservations,
        cancellations,
        waitlists,
        finalize,
        sweeper,
        reconciler,
    }
}

impl TestCore {
    /// Настраивает событие и инициализирует его бакет, как это сделал бы
    /// стартовый цикл реконсиляции.
    pub async fn event_with_bucket(&self, capacity: i32) -> Uuid {
        let event_id = self.store.insert_event(capacity);
        self.tokens.init(event_id, capacity).await.unwrap();
        event_id
    }

    /// Прогоняет накопившиеся сообщения финализации через воркер.
    pub async fn drain_finalize(&self) {
        for payload in self.queue.drain() {
            let raw = serde_json::to_vec(&payload).unwrap();
            let key = payload.event_id.to_string();
            self.finalize.process(key.as_bytes(), &raw).await.unwrap();
        }
    }
}
