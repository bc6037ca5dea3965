//! tokens.rs
//!
//! Счетный токен-бакет на Redis - шлюз допуска конвейера бронирования.
//!
//! На каждое событие хранится счетчик `tokens:{event_id}` и ключ-подсказка
//! `capacity:{event_id}`. Захват и возврат токенов выполняются Lua-скриптами,
//! поэтому операции атомарны и линеаризуемы в пределах ключа. Бакет - кеш
//! допуска: авторитетный счет живет в базе, расхождения чинит реконсилятор.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::redis_client::RedisClient;

/// Интерфейс шлюза допуска (admission gate).
#[async_trait]
pub trait TokenBucket: Send + Sync {
    /// Идемпотентно выставляет счетчик в `capacity`, если он еще не заведен.
    async fn init(&self, event_id: Uuid, capacity: i32) -> CoreResult<()>;

    /// Атомарно списывает `n` токенов, если их хватает.
    /// Возвращает `false` без побочных эффектов, если токенов меньше `n`
    /// или счетчик не инициализирован.
    async fn reserve(&self, event_id: Uuid, n: i32) -> CoreResult<bool>;

    /// Атомарно возвращает `n` токенов. Если известна вместимость события,
    /// счетчик зажимается сверху, чтобы возврат не "раздул" бакет.
    async fn release(&self, event_id: Uuid, n: i32) -> CoreResult<()>;

    /// Текущий остаток; `None` - счетчик не инициализирован.
    async fn remaining(&self, event_id: Uuid) -> CoreResult<Option<i32>>;

    /// Ставит короткоживущий маркер незавершенного бронирования.
    async fn set_hold(&self, event_id: Uuid, booking_id: Uuid, ttl: Duration) -> CoreResult<()>;

    async fn clear_hold(&self, event_id: Uuid, booking_id: Uuid) -> CoreResult<()>;
}

// Списание: отказ, если счетчика нет или остатка не хватает.
const RESERVE_SCRIPT: &str = r#"
local remaining = redis.call('GET', KEYS[1])
if not remaining then
  return 0
end
local n = tonumber(ARGV[1])
if tonumber(remaining) >= n then
  redis.call('DECRBY', KEYS[1], n)
  return 1
end
return 0
"#;

// Возврат с зажимом: остаток не должен превысить вместимость.
const RELEASE_SCRIPT: &str = r#"
local n = tonumber(ARGV[1])
local cur = tonumber(redis.call('GET', KEYS[1]) or '0')
local next = cur + n
local cap = redis.call('GET', KEYS[2])
if cap then
  next = math.min(next, tonumber(cap))
end
redis.call('SET', KEYS[1], next)
return next
"#;

pub struct RedisTokenBucket {
    redis: RedisClient,
    reserve_script: redis::Script,
    release_script: redis::Script,
}

impl RedisTokenBucket {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            reserve_script: redis::Script::new(RESERVE_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    fn tokens_key(event_id: Uuid) -> String {
        format!("tokens:{}", event_id)
    }

    fn capacity_key(event_id: Uuid) -> String {
        format!("capacity:{}", event_id)
    }

    fn hold_key(event_id: Uuid, booking_id: Uuid) -> String {
        format!("hold:{}:{}", event_id, booking_id)
    }
}

#[async_trait]
impl TokenBucket for RedisTokenBucket {
    async fn init(&self, event_id: Uuid, capacity: i32) -> CoreResult<()> {
        let mut conn = self.redis.conn();
        // Вместимость неизменна, ее можно перезаписывать; счетчик - только NX.
        let _: () = conn.set(Self::capacity_key(event_id), capacity).await?;
        let _: bool = conn.set_nx(Self::tokens_key(event_id), capacity).await?;
        Ok(())
    }

    async fn reserve(&self, event_id: Uuid, n: i32) -> CoreResult<bool> {
        let mut conn = self.redis.conn();
        let granted: i32 = self
            .reserve_script
            .key(Self::tokens_key(event_id))
            .arg(n)
            .invoke_async(&mut conn)
            .await?;
        Ok(granted == 1)
    }

    async fn release(&self, event_id: Uuid, n: i32) -> CoreResult<()> {
        let mut conn = self.redis.conn();
        let _: i32 = self
            .release_script
            .key(Self::tokens_key(event_id))
            .key(Self::capacity_key(event_id))
            .arg(n)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remaining(&self, event_id: Uuid) -> CoreResult<Option<i32>> {
        let mut conn = self.redis.conn();
        let remaining: Option<i32> = conn.get(Self::tokens_key(event_id)).await?;
        Ok(remaining)
    }

    async fn set_hold(&self, event_id: Uuid, booking_id: Uuid, ttl: Duration) -> CoreResult<()> {
        let mut conn = self.redis.conn();
        let _: () = conn
            .set_ex(
                Self::hold_key(event_id, booking_id),
                1,
                ttl.as_secs().max(1),
            )
            .await?;
        Ok(())
    }

    async fn clear_hold(&self, event_id: Uuid, booking_id: Uuid) -> CoreResult<()> {
        let mut conn = self.redis.conn();
        let _: () = conn.del(Self::hold_key(event_id, booking_id)).await?;
        Ok(())
    }
}
