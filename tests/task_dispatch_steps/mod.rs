//! Step definitions for task dispatch scenarios.

pub mod world;

mod given;
mod then;
mod when;
