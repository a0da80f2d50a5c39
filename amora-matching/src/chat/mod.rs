pub mod relay;
pub mod store;

pub use relay::MessageRelay;
pub use store::PgSessionStore;
