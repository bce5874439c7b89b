//! Test harness helpers, compiled behind the `test-harness` feature.

/// Install a global `tracing` subscriber printing to stderr. Safe to call
/// from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
