pub mod chat;
pub mod config;
pub mod domain;
pub mod geo;
pub mod matching;
pub mod models;
pub mod ports;
pub mod schema;
pub mod service;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::EngineConfig;
pub use service::MatchingEngine;
