use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rollcall_store::Store;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod extract;
mod guard;
mod router;
mod service;

use config::Config;
use dbus_interface::AttendanceService;
use extract::CommandExtractor;
use service::Service;

/// First run only: create an admin operator from the environment so the
/// daemon is reachable before any account exists.
fn bootstrap_admin(store: &Store) -> Result<()> {
    if store.has_operators()? {
        return Ok(());
    }
    let (Ok(username), Ok(password)) = (
        std::env::var("ROLLCALL_ADMIN_USER"),
        std::env::var("ROLLCALL_ADMIN_PASSWORD"),
    ) else {
        tracing::warn!(
            "no operators exist and ROLLCALL_ADMIN_USER/ROLLCALL_ADMIN_PASSWORD \
             are unset; logins will fail until an operator is created"
        );
        return Ok(());
    };
    store.create_operator(&username, &password, true)?;
    tracing::info!(username, "bootstrapped initial admin operator");
    Ok(())
}

/// Hourly pass closing stale open attendance records. Idempotent, so the
/// interval only bounds how long a record can stay open past the threshold.
async fn run_sweep_loop(engine: engine::EngineHandle, days: u64, checkout_time: NaiveTime) {
    loop {
        match engine.sweep(days, checkout_time).await {
            Ok(report) if report.updated > 0 => {
                tracing::info!(updated = report.updated, "auto-checkout sweep closed records");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "auto-checkout sweep failed"),
        }
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
    }

    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    bootstrap_admin(&store)?;

    let extractor = CommandExtractor::new(&config.extractor_cmd);
    let engine = engine::spawn_engine(store, Box::new(extractor), config.match_tolerance);

    let sweep_time = NaiveTime::parse_from_str(&config.sweep_checkout_time, "%H:%M")
        .context("invalid ROLLCALL_SWEEP_CHECKOUT_TIME, want HH:MM")?;
    tokio::spawn(run_sweep_loop(
        engine.clone(),
        config.sweep_days,
        sweep_time,
    ));

    let service = Arc::new(Service::new(engine));

    let _connection = zbus::connection::Builder::session()?
        .name(config.bus_name.as_str())?
        .serve_at(
            "/org/rollcall/Attendance1",
            AttendanceService::new(service),
        )?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(bus_name = %config.bus_name, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
