pub mod db;
pub mod redis;

pub use db::{create_pool, DbPool};
pub use redis::RedisClient;
