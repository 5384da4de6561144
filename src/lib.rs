//! BLE Security Profiler
//!
//! Determines the security each GATT characteristic of a peripheral requires:
//! - probes read, write and notify access without security
//! - escalates through SMP legacy pairing levels until access succeeds
//! - writes a JSON report of the lowest level that worked per access

pub mod backend;
pub mod config;
pub mod core;
pub mod smp;

pub use core::{
    error::{AccessError, LinkError, PairingFailure, ProfilerError},
    orchestrator::Orchestrator,
    report::SecurityReport,
    types::{AccessType, DeviceAddress, SecurityLevel},
};
