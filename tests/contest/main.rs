//! Integration tests for contest resolution.
//!
//! This test target aggregates all contest component tests.


mod concurrency;
mod resolver;
mod store;
