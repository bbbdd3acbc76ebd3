use common::config::TestContextConfig;
use std::error::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Installs a `fmt` subscriber writing through the test harness.
///
/// `RUST_LOG` directives apply on top of `log_level`. Fails when a global
/// subscriber is already installed, which callers running many tests in one
/// process can ignore.
pub fn init_tracing(log_level: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let directive: Directive = log_level.parse()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_test_writer()
        .try_init()
}

pub fn init_from_config(config: &TestContextConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    init_tracing(&config.log_level)
}
