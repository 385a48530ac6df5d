//! Testing utilities and mock implementations
//!
//! Provides mock `LlmAdapter` and `ContainerProvider` implementations, plus
//! small fixture builders, so executor and orchestrator tests run with no
//! network or container access.

pub mod fixtures;
pub mod mocks;

pub use mocks::*;
