//! Adapter implementations for task ports.

pub mod llm;
pub mod memory;
pub mod postgres;
