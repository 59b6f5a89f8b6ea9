use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slotbench::config::DriverConfig;
use slotbench::driver::{Driver, SimulatedBooker};
use slotbench::scheduler::ReservationScheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = DriverConfig::from_env();
    slotbench::observability::init(cfg.metrics_port)?;

    let scheduler = Arc::new(ReservationScheduler::new(
        cfg.base_at,
        cfg.slots,
        cfg.horizon_hours,
    )?);
    let loaded = scheduler.load_reservations(cfg.seed()?).await?;

    info!("slotbench starting");
    info!("  reservations: {loaded}");
    info!("  slots per hour: {}", cfg.slots);
    info!("  parallelism: {}", cfg.parallelism);
    info!("  duration: {}s", cfg.duration.as_secs());
    info!("  metrics: {}", cfg.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let ctx = CancellationToken::new();
    let driver = Driver::new(
        SimulatedBooker::new(7, Duration::from_millis(5)),
        scheduler.clone(),
        &cfg,
        &ctx,
    )?;

    // Stop on the run deadline, SIGTERM, or ctrl-c
    let stopper = {
        let ctx = ctx.clone();
        let duration = cfg.duration;
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = tokio::time::sleep(duration) => info!("run duration elapsed"),
                            _ = ctrl_c => info!("interrupted"),
                            _ = sigterm.recv() => info!("terminated"),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("failed to register SIGTERM handler: {e}");
                        tokio::select! {
                            _ = tokio::time::sleep(duration) => info!("run duration elapsed"),
                            _ = ctrl_c => info!("interrupted"),
                        }
                    }
                }
            }
            #[cfg(not(unix))]
            {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => info!("run duration elapsed"),
                    _ = ctrl_c => info!("interrupted"),
                }
            }
            ctx.cancel();
        })
    };

    driver.run(ctx.clone()).await?;
    ctx.cancel();
    stopper.await?;

    let committed = scheduler.committed().await.len();
    println!("=== slotbench results ===");
    println!("  committed reservations: {committed}/{loaded}");
    for (tag, count) in driver.counter().breakdown() {
        println!("  {tag:<20} {count}");
    }
    let peak = scheduler.temperatures().snapshot().await.into_iter().max().unwrap_or(0);
    println!("  hottest hour bucket: {peak}/{}", cfg.slots);

    info!("slotbench stopped");
    Ok(())
}
