use redis::{aio::MultiplexedConnection, Client};

/// Подключение к Redis для шлюза допуска. Бакет - критичная зависимость
/// конвейера, поэтому связь проверяется PING-ом уже на старте.
#[derive(Clone)]
pub struct RedisClient {
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(RedisClient { conn })
    }

    /// Клон мультиплексированного соединения под одну операцию.
    pub fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}
