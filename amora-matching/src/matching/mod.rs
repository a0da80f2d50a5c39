pub mod pool;
pub mod selector;

pub use pool::RedisWaitingPool;
pub use selector::{find_match, target_gender, MatchCandidate, MatchQuery};
