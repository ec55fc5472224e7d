#![allow(clippy::result_large_err)]

use cartographer::app::DiscoveryApp;
use cartographer::config::DiscoveryConfig;
use cartographer::error::Error;
use cartographer::telemetry;
use tracing::{error, info};

/// The process is invoked without arguments; configuration arrives through
/// the environment. Exit code 0 on success and on the already-running
/// sentinel, 1 on any fatal error.
#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config = match DiscoveryConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return 1;
        }
    };

    if let Err(err) = telemetry::init_tracing(config.log_level.as_deref()) {
        eprintln!("failed to initialise telemetry: {err}");
        return 1;
    }

    info!(
        event = "crawl_started",
        region = %config.region,
        mode = if config.organizations_mode() { "organizations" } else { "self-managed" },
    );

    let result = match DiscoveryApp::initialise(config).await {
        Ok(app) => app.run().await,
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => 0,
        Err(err) => report_failure(&err),
    }
}

fn report_failure(err: &Error) -> i32 {
    match err.root() {
        Error::DiscoveryAlreadyRunning => {
            info!(
                event = "crawl_skipped",
                "discovery is already running in this environment; nothing to do"
            );
            0
        }
        Error::AggregatorNotFound { aggregator } => {
            error!(
                event = "crawl_failed",
                kind = "AggregatorNotFoundError",
                aggregator = %aggregator,
                error = %err,
                "the configured aggregator does not exist; deploy the aggregator before running discovery"
            );
            1
        }
        Error::OrgAggregatorValidation { aggregator } => {
            error!(
                event = "crawl_failed",
                kind = "OrgAggregatorValidationError",
                aggregator = %aggregator,
                error = %err,
                "the configured aggregator is not an organization-wide aggregator"
            );
            1
        }
        root => {
            error!(
                event = "crawl_failed",
                kind = kind_name(root),
                error = %err,
                "crawl aborted"
            );
            1
        }
    }
}

fn kind_name(err: &Error) -> &'static str {
    match err {
        Error::VpcConfigurationValidation { .. } => "VpcConfigurationValidationError",
        Error::AccessDenied { .. } => "AccessDeniedError",
        Error::PayloadTooLarge => "PayloadTooLargeError",
        Error::ConnectionClosedPrematurely => "ConnectionClosedPrematurelyError",
        Error::ResolverCodeSize => "ResolverCodeSizeError",
        Error::UnprocessedSearchIndexResources { .. } => "UnprocessedSearchIndexResourcesError",
        _ => "Error",
    }
}
