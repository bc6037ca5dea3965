pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod queue;
pub mod redis_client;
pub mod services;
pub mod store;
pub mod tokens;
pub mod workers;

pub use error::{CoreError, CoreResult, ErrorKind};
