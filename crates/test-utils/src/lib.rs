//! Shared helpers for the jobdag integration tests: process and manager
//! builders, scripted actions, stores with injected faults.

pub mod builders;
pub mod fake_actions;
pub mod failing_store;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// Upper bound for anything a test awaits on the engine or executor.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Route engine and executor logs into the test harness once per binary.
///
/// Output is captured and only shown for failing tests. `RUST_LOG` picks
/// the filter, e.g. `RUST_LOG=jobdag::engine=debug`; default is `info`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking if it takes longer than [`TEST_TIMEOUT`].
///
/// A hung run or a monitor that never drains fails the test instead of
/// blocking the whole suite.
pub async fn with_timeout<F: Future>(f: F) -> F::Output {
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(out) => out,
        Err(_) => panic!("gave up after {TEST_TIMEOUT:?}"),
    }
}
