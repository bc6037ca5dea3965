//! reconciler.rs
//!
//! Реконсилятор (C9): периодически выравнивает токен-бакет по
//! авторитетным счетчикам базы.
//!
//! Бакет может разъехаться с базой: процесс упал между списанием токенов
//! и вставкой pending-строки, возврат не прошел из-за сетевой ошибки и
//! т.п. Цель: `remaining == capacity - reserved - места в pending`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::error::CoreResult;
use crate::store::{BookingStore, EventStore};
use crate::tokens::TokenBucket;

pub struct Reconciler {
    events: Arc<dyn EventStore>,
    bookings: Arc<dyn BookingStore>,
    tokens: Arc<dyn TokenBucket>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        events: Arc<dyn EventStore>,
        bookings: Arc<dyn BookingStore>,
        tokens: Arc<dyn TokenBucket>,
        interval: Duration,
    ) -> Self {
        Self {
            events,
            bookings,
            tokens,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("reconciler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            match self.reconcile_once().await {
                Ok(0) => {}
                Ok(fixes) => info!("reconciliation fixed {} token buckets", fixes),
                Err(e) => error!("reconciliation pass failed: {}", e),
            }
        }
        info!("reconciler stopped");
    }

    /// Один проход по всем событиям; возвращает число исправленных бакетов.
    pub async fn reconcile_once(&self) -> CoreResult<u64> {
        metrics::counter!("reconciliation.runs").increment(1);
        let mut fixes = 0u64;

        for counts in self.events.counts().await? {
            let pending = self.bookings.pending_seat_count(counts.id).await?;
            let desired = (i64::from(counts.capacity) - i64::from(counts.reserved) - pending)
                .max(0) as i32;

            let actual = match self.tokens.remaining(counts.id).await? {
                Some(remaining) => remaining,
                None => {
                    // Счетчик не заведен: свежий деплой или потеря Redis.
                    self.tokens.init(counts.id, counts.capacity).await?;
                    counts.capacity
                }
            };

            if desired == actual {
                continue;
            }

            if desired > actual {
                self.tokens.release(counts.id, desired - actual).await?;
            } else {
                // Излишек выбирается через reserve по одному токену, чтобы
                // не затереть конкурентные списания обычного трафика.
                let mut excess = actual - desired;
                while excess > 0 {
                    if !self.tokens.reserve(counts.id, 1).await? {
                        break;
                    }
                    excess -= 1;
                }
            }

            fixes += 1;
            metrics::counter!("reconciliation.fixes").increment(1);
            info!(
                event_id = %counts.id,
                desired,
                was = actual,
                "reconciled token bucket"
            );
        }

        Ok(fixes)
    }
}
