//! Shared test infrastructure for the pool test suites

pub mod fixtures;
pub mod helpers;

pub use fixtures::TestFixtures;
pub use helpers::{GatedSpawner, PoolBuilder, TestHelpers};
