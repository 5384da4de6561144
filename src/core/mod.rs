//! Core profiling logic

pub mod att;
pub mod connection;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod pairing;
pub mod passkey;
pub mod report;
pub mod scheduler;
pub mod types;
