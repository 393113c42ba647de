//! PM Monitor collector
//!
//! Reads the detector in a loop and writes one JSON record per line to
//! stdout. Logs go to stderr. Usage: `pm-monitor [config.json]`

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use pm_monitor_core::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = MonitorConfig::resolve(config_path.as_deref())
        .with_context(|| format!("failed to load configuration from {:?}", config_path))?;

    let driver = DeviceDriver::open(&config.driver_config()).context("failed to open PM detector")?;
    tracing::info!(version = pm_monitor_core::VERSION, "monitor starting");

    let monitor = Monitor::new(JsonLinesSink::new(io::stdout()))
        .with_source(DeviceCycle::new(driver, config));

    let token = monitor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            token.cancel();
        }
    });

    monitor.run().await.context("monitor stopped on a fatal fault")
}
