use std::sync::Once;

use tracing_subscriber::{EnvFilter, prelude::*};

use crate::settings::LogFormat;

static INIT: Once = Once::new();
static TEST_INIT: Once = Once::new();

fn build_env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize tracing once. `RUST_LOG` overrides the default filter, which is
/// `debug` when `verbose` is set and `info` otherwise.
///
/// The `log_format` parameter controls whether logs are output as human-readable
/// text (default) or structured JSON.
pub fn init(log_format: LogFormat, verbose: bool) -> anyhow::Result<()> {
    let mut init_result: Option<anyhow::Result<()>> = None;
    INIT.call_once(|| {
        let env_filter = build_env_filter(if verbose { "debug" } else { "info" });
        let result = match log_format {
            LogFormat::Text => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .compact()
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(fmt_layer).try_init()
            }
            LogFormat::Json => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .json()
                    .with_filter(env_filter);
                tracing_subscriber::registry().with(fmt_layer).try_init()
            }
        };
        init_result = Some(result.map_err(anyhow::Error::from));
    });
    init_result.unwrap_or(Ok(()))
}

/// Install a test-writer subscriber once per test binary, so output is
/// captured per test by the harness.
fn init_for_tests() {
    TEST_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(build_env_filter("info"))
            .with_test_writer()
            .compact()
            .try_init();
    });
}

/// Run an async test body with tracing installed.
pub async fn with_test_tracing<F, Fut, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    init_for_tests();
    tracing::debug!(test = test_name, "starting test");
    f().await
}

/// Synchronous equivalent of [`with_test_tracing`].
pub fn with_test_tracing_sync<F, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    init_for_tests();
    tracing::debug!(test = test_name, "starting test");
    f()
}
