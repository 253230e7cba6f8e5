//! Bombuh Controller
//!
//! Runs the bus cycle: poll devices, advance the countdown, publish status.
//! Admin commands are read as JSON lines on stdin; responses and status
//! reports are written as JSON lines on stdout. Logs go to stderr.

use std::io::BufRead;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bombuh::{
    admin::{AdminCommand, AdminController, AdminResponse, ServiceRegistry, StatusReport},
    bus::{Bus, NullBus, StaticComponent},
    core::clock::{Clock, MonotonicClock},
    dispatch::Dispatcher,
    game::{events::event_mask, register_builtin_handlers, Bomb, BombEvent},
    settings::ControllerConfig,
    VERSION,
};

const DUMMY_LABEL_OPTIONS: [&str; 5] = ["FRK", "CAR", "BOB", "IND", "SND"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ControllerConfig::from_env();
    info!("Bombuh Controller v{}", VERSION);
    info!(
        poll_ms = config.poll_interval_ms,
        sync_ms = config.sync_interval_ms,
        status_ms = config.status_interval_ms,
        "controller settings"
    );

    let bus = Arc::new(Bus::new(Box::new(NullBus)));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let bomb = Arc::new(Mutex::new(Bomb::new(bus, clock, &config)));

    {
        let mut bomb = bomb.lock();
        if config.attach_dummy_devices {
            bomb.add_virtual_device(Box::new(StaticComponent::dummy_label(&DUMMY_LABEL_OPTIONS)))?;
            bomb.add_virtual_device(Box::new(StaticComponent::dummy_battery(2, 1)))?;
        }
        bomb.discover_modules();
    }

    // Paired services
    let (service_tx, mut service_rx) = mpsc::unbounded_channel();
    let mut services = ServiceRegistry::new();
    services.register_forwarder("audio", event_mask(&BombEvent::ALL), service_tx);
    tokio::spawn(async move {
        while let Some(event) = service_rx.recv().await {
            debug!(
                capability = %event.capability,
                address = %event.address,
                event_id = event.event_id,
                "service event"
            );
        }
    });

    // Status reports
    let (status_tx, mut status_rx) = broadcast::channel::<StatusReport>(config.status_channel_capacity);
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(report) => match report.to_json() {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!("status report not serializable: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("status consumer lagged, {} reports dropped", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Admin commands; a plain thread so a blocked stdin read never holds up shutdown
    let admin = AdminController::new(Arc::clone(&bomb), services);
    std::thread::spawn(move || read_admin_commands(admin));

    {
        let bomb = Arc::clone(&bomb);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                let _ = tokio::task::spawn_blocking(move || {
                    bomb.lock().exit();
                })
                .await;
            }
        });
    }

    tokio::task::spawn_blocking(move || run_cycle(bomb, config, status_tx)).await?;

    info!("controller stopped");
    Ok(())
}

/// Main cycle. Returns once an exit has been requested.
fn run_cycle(bomb: Arc<Mutex<Bomb>>, config: ControllerConfig, status_tx: broadcast::Sender<StatusReport>) {
    let mut dispatcher = Dispatcher::new();
    register_builtin_handlers(&mut dispatcher);

    let status_every = Duration::from_millis(u64::from(config.status_interval_ms));
    let mut last_status: Option<Instant> = None;

    loop {
        let started = Instant::now();
        {
            let mut bomb = bomb.lock();
            if bomb.exit_requested() {
                break;
            }

            let report = dispatcher.sync(&mut bomb);
            if report.transport_failures > 0 || report.decode_failures > 0 {
                debug!(?report, "poll cycle had failures");
            }
            bomb.update();

            let forced = bomb.take_force_status_report();
            if forced || last_status.map_or(true, |t| t.elapsed() >= status_every) {
                // No subscribers is fine
                let _ = status_tx.send(StatusReport::of(&bomb));
                last_status = Some(Instant::now());
            }
        }
        std::thread::sleep(config.poll_interval().saturating_sub(started.elapsed()));
    }
}

fn read_admin_commands(admin: AdminController) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("admin input failed: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match AdminCommand::from_json(&line) {
            Ok(command) => admin.handle(command),
            Err(e) => AdminResponse::Error {
                message: format!("invalid command: {e}"),
            },
        };
        match response.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("admin response not serializable: {}", e),
        }
    }
    debug!("admin input closed");
}
