//! Task lifecycle orchestration.
//!
//! Tasks move through `pending → queued → running → {completed, failed}`
//! and may be cancelled from any non-terminal state. Every status write is
//! conditional on the status last read, so a cancellation that lands first
//! always beats a late worker result. The module follows hexagonal
//! architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
