//! Logging bootstrap for tests. Call `init_test_logger` at the start of a
//! test to get `tracing` output on the captured test writer.

use tracing_subscriber::EnvFilter;

fn setup(default_filter: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Ignore the error when another test in the same process already
    // installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn init_test_logger() {
    setup("cache=info,checks=info,metrics=info,picker=info,relayer=info,debug");
}

pub fn init_integration_logger() {
    setup("info");
}
