//! sweeper.rs
//!
//! Свипер холдов (C8): истекшие pending-бронирования переводятся в
//! `expired`, их токены возвращаются в бакет.
//!
//! TTL ключа холда в Redis сам по себе не возвращает токены - ключ
//! просто исчезает. Свипер закрывает этот разрыв, сканируя pending-строки
//! старше `hold_ttl + grace` с ограничением на размер пачки за проход.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::CoreResult;
use crate::store::BookingStore;
use crate::tokens::TokenBucket;

pub struct HoldSweeper {
    bookings: Arc<dyn BookingStore>,
    tokens: Arc<dyn TokenBucket>,
    hold_ttl: Duration,
    grace: Duration,
    interval: Duration,
    batch_size: i64,
}

impl HoldSweeper {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        tokens: Arc<dyn TokenBucket>,
        hold_ttl: Duration,
        grace: Duration,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            bookings,
            tokens,
            hold_ttl,
            grace,
            interval,
            batch_size,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("hold sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(expired) => info!("expired {} stale pending bookings", expired),
                Err(e) => error!("sweep pass failed: {}", e),
            }
        }
        info!("hold sweeper stopped");
    }

    /// Один проход: возвращает число истекших бронирований.
    pub async fn sweep_once(&self) -> CoreResult<usize> {
        let age = self.hold_ttl + self.grace;
        let cutoff = Utc::now() - chrono::Duration::seconds(age.as_secs() as i64);

        let stale = self
            .bookings
            .stale_pending(cutoff, self.batch_size)
            .await?;
        let mut expired = 0;

        for booking in stale {
            // Compound-and сериализует гонку с финализатором: проигравшая
            // сторона видит false и не трогает токены.
            if !self.bookings.expire_pending(booking.id).await? {
                continue;
            }
            if let Err(e) = self
                .tokens
                .release(booking.event_id, booking.seat_count())
                .await
            {
                warn!(
                    "token release failed for expired booking {}: {}",
                    booking.id, e
                );
            }
            if let Err(e) = self
                .tokens
                .clear_hold(booking.event_id, booking.id)
                .await
            {
                warn!("failed to clear hold for {}: {}", booking.id, e);
            }
            expired += 1;
        }

        Ok(expired)
    }
}
