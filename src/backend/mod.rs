//! Link backend abstraction layer

pub mod bluer_backend;
pub mod link_backend;
pub mod mock_backend;

pub use bluer_backend::{BluerBackend, BluerSession};
pub use link_backend::{LinkBackend, LinkSession, SmpEvent};

#[cfg(test)]
pub use mock_backend::{AccessRule, MockLinkBackend, PeripheralPairing};
