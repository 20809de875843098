//! Basic zlog usage example
//!
//! Writes a few records into `./example_logs/{date}/demo.json` and
//! `demo_err.json`, then keeps a periodic retention sweep running for a
//! moment.
//!
//! Run with: cargo run --example basic_usage

use std::io;
use std::time::{Duration, Instant};
use zlog::{print, printf, Logger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Show the crate's own diagnostics (rotation, sweeps) on stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zlog=debug".into()),
        )
        .init();

    let config_path = std::env::temp_dir().join("zlog-basic-usage.toml");
    std::fs::write(
        &config_path,
        "Path = \"./example_logs\"\nName = \"demo\"\nMaxDays = 7\n",
    )?;

    println!("Initializing logger from {}", config_path.display());
    let logger = Logger::init(&config_path);

    logger.info("service started", Some("port=8080"));
    logger.warn("cache disabled", None);
    logger.debug("not persisted in production mode", None);

    let started = Instant::now();
    let err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
    logger.error("upstream unavailable", Some(&err));

    let sugar = logger.sugar();
    sugar.infof(format_args!("{} workers ready", 4));
    sugar.infow("login", "user=alice");

    let summary = printf(&[
        &"GET",
        &200,
        &"/api/users",
        &"127.0.0.1",
        &started.elapsed().as_secs_f64(),
    ]);
    logger.info(&summary, Some(print(&[&"access"]).trim_end()));

    if let Some(sweeper) = logger.retention() {
        let handle = sweeper.start(Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();
    }

    logger.sync()?;
    println!("Records written below ./example_logs");

    Ok(())
}
