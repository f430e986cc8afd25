//! Integration test entry point.
//!
//! Individual test modules are in tests/integration/.
//!
//! Run all integration tests:
//!   cargo test --test integration
//!
//! Run specific test module:
//!   cargo test --test integration flow

#[path = "integration/flow_tests.rs"]
mod flow_tests;

#[path = "integration/multi_source_tests.rs"]
mod multi_source_tests;

#[path = "integration/query_tests.rs"]
mod query_tests;
