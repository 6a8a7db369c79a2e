//! CodeChat Gateway - Main entry point.

use anyhow::Result;
use codechat_common::config::Config;
use codechat_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load_and_validate()?;

    // Initialize logging
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("CodeChat Gateway v{}", env!("CARGO_PKG_VERSION"));

    codechat_gateway::start_server(&config).await
}
