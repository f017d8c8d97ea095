//! Testing utilities and mock implementations
//!
//! Doubles for the content store, the registry contract, the agent store and
//! the job queue, usable from unit and integration tests alike.

pub mod mocks;

pub use mocks::*;
