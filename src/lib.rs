//! Conductor: task lifecycle orchestration for language model work.
//!
//! Callers submit prompts as tasks; the dispatcher stores them, hands them
//! to a work queue, and workers claim and execute them against a language
//! model provider. Tasks can be chained into lineage graphs, cancelled,
//! and retried within a budget, and every execution attempt is kept in an
//! append-only ledger.
//!
//! # Architecture
//!
//! Conductor follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (database, queue, HTTP)
//!
//! # Modules
//!
//! - [`task`]: Task lifecycle, dispatch, lineage, and execution
//! - [`config`]: Layered runtime settings
//! - [`telemetry`]: Tracing subscriber initialisation

pub mod config;
pub mod task;
pub mod telemetry;
