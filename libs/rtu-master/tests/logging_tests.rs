//! Global subscriber installation
//!
//! Kept in its own test binary: the subscriber is process-wide and would
//! collide with `#[traced_test]` in the unit tests.

use rtu_master::logging;

#[test]
fn test_init_installs_once() {
    assert!(logging::init("debug"));
    assert!(!logging::init("info"));
    tracing::info!("subscriber installed");
}
