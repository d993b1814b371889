//! Common test utilities and infrastructure
//!
//! Shared fixtures and in-memory collaborator fakes used across the
//! orchestrator integration tests.

pub mod fixtures;
pub mod helpers;

pub use fixtures::TestFixtures;
pub use helpers::{FakeArchive, FakeBackend, FakeStore, TestHelpers};
