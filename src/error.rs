//! error.rs
//!
//! Типизированные ошибки ядра бронирования.
//!
//! Внешний слой (HTTP и т.п.) отображает `ErrorKind` в статус-коды,
//! ядро оперирует только этими вариантами. Транспортные ошибки
//! (`Database`, `Cache`, `Queue`) считаются временными и ретраятся
//! воркером финализации.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("event is closed for booking")]
    EventClosed,

    #[error("cannot book more than {max} tickets")]
    OverLimit { max: i32 },

    #[error("idempotency key already used for a different request")]
    Conflict,

    /// Вместимость исчерпана при финализации. Ядро само не возвращает этот
    /// вариант - бронь асинхронно уходит в waitlisted
    /// (`store::FinalizeOutcome::SoldOut`); он зарезервирован за внешним
    /// HTTP-слоем, который транслирует такой исход в ошибку API.
    #[error("event sold out")]
    SoldOut,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invariant violated: {0}")]
    Fatal(String),
}

/// Категории ошибок, которые видит внешний потребитель ядра.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    EventClosed,
    OverLimit,
    Conflict,
    SoldOut,
    Transient,
    Fatal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::EventClosed => ErrorKind::EventClosed,
            CoreError::OverLimit { .. } => ErrorKind::OverLimit,
            CoreError::Conflict => ErrorKind::Conflict,
            CoreError::SoldOut => ErrorKind::SoldOut,
            CoreError::Database(_) | CoreError::Cache(_) | CoreError::Queue(_) => {
                ErrorKind::Transient
            }
            CoreError::Decode(_) | CoreError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Временная ли ошибка: такие имеет смысл повторять с бэкоффом.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
