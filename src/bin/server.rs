#![cfg(not(tarpaulin_include))]

use prodboard::config::DashboardConfig;
use prodboard::web;

/// Main entry point for the dashboard web server
///
/// Configuration comes from the JSON file named by `PRODBOARD_CONFIG` (if
/// any) and `PRODBOARD_*` environment overrides. Logging is controlled with
/// `RUST_LOG` and defaults to `info`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = DashboardConfig::from_env()?;
    log::info!(
        "starting dashboard: data dir {}, expiry {:?}, refresh every {:?}",
        config.data_dir.display(),
        config.expiry,
        config.refresh_interval
    );
    web::run(config).await
}
