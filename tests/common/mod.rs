//! Helpers shared by the integration tests.

#![allow(dead_code)]

use ferrous_lifecycle::{ServiceContainer, ServiceName};
use tracing_subscriber::EnvFilter;

/// Routes engine logs to the test output. Run with
/// `RUST_LOG=ferrous_lifecycle=debug` to see every transition of a failing
/// test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh container with tracing installed.
pub fn container() -> ServiceContainer {
    init_tracing();
    ServiceContainer::new()
}

pub fn name(s: &str) -> ServiceName {
    ServiceName::parse(s).unwrap()
}
