//! LED Matrix Display Server for Raspberry Pi
//!
//! A Rust-based server that:
//! - Drives an addressable LED matrix with interchangeable display apps
//! - Switches apps on a schedule or a GPIO button press
//! - Falls back to a WiFi captive-portal setup mode when unconfigured
//! - Provides a JSON admin API and runs with graceful shutdown

mod apps;
mod button;
mod config;
mod display;
mod network;
mod web;

use clap::Parser;
use config::{Config, ConfigStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use apps::scheduler::AppScheduler;
use apps::DisplayApp;
use button::{ButtonMonitor, GpioButton, NullButton};
use display::{Canvas, MockPanel, RenderPipeline, Rgb};
use network::portal::CaptivePortal;
use network::wifi::NmcliWifi;
use network::NetworkMachine;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "led-matrix-display")]
#[command(about = "LED Matrix Display Server for Raspberry Pi")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Admin API port (overrides config, default: 8080)
    #[arg(long = "http-port")]
    http_port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run without GPIO/WiFi hardware (mock button and radio)
    #[arg(long)]
    mock: bool,

    /// Show a test pattern and exit
    #[arg(long)]
    test: bool,
}

/// Using current_thread runtime for single-core Pi Zero W class hardware
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    tracing::info!("Starting LED Matrix Display Server");

    let config = Config::load(&args.config).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {}: {}", args.config, e);
        tracing::info!("Using default configuration");
        Config::default()
    });
    let store = Arc::new(ConfigStore::new(args.config.clone(), config.clone()));

    // The concrete matrix binding is platform-specific; everything runs
    // against the PanelDriver capability, mock when the binding is absent.
    let panel = MockPanel::new();

    if args.test {
        return run_test_pattern(panel, &config);
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Network state machine
    let (network_state, network_tx, network_handle) = if args.mock {
        let wifi = network::wifi::MockWifi { connected: None };
        let (machine, state, tx) =
            NetworkMachine::new(wifi, network::portal::NullPortal, Arc::clone(&store));
        let shutdown = shutdown_tx.subscribe();
        (state, tx, tokio::spawn(machine.run(shutdown)))
    } else {
        let wifi = NmcliWifi::new(&config.network.interface);
        let portal = CaptivePortal::new(config.network.portal_port);
        let (machine, state, tx) = NetworkMachine::new(wifi, portal, Arc::clone(&store));
        let shutdown = shutdown_tx.subscribe();
        (state, tx, tokio::spawn(machine.run(shutdown)))
    };

    // App registry; insertion order is rotation order
    let settings = |name: &str| {
        config
            .apps
            .settings
            .get(name)
            .cloned()
            .unwrap_or_default()
    };
    let registry: Vec<Box<dyn DisplayApp>> = vec![
        Box::new(apps::clock::ClockApp::new(settings("clock"))),
        Box::new(apps::wordclock::WordClockApp::new(settings("wordclock"))),
        Box::new(apps::weather::WeatherApp::new(settings("weather"))),
        Box::new(apps::stocks::StocksApp::new(settings("stocks"))),
        Box::new(apps::spotify::SpotifyApp::new(settings("spotify"))),
        Box::new(apps::text::TextApp::new(settings("text"))),
    ];

    let scheduler = Arc::new(AppScheduler::new(
        registry,
        Arc::clone(&store),
        network_tx.clone(),
    ));
    if let Err(e) = scheduler.activate(&config.apps.active_app) {
        tracing::warn!("Could not activate '{}': {e}", config.apps.active_app);
        if let Err(e) = scheduler.activate("clock") {
            tracing::error!("Could not activate fallback app: {e}");
        }
    }

    // Render pipeline owns the panel
    let (pipeline, display_handle) = RenderPipeline::new(
        panel,
        Arc::clone(&scheduler),
        network_state.clone(),
        Arc::clone(&store),
    );
    let pipeline_handle = tokio::spawn(pipeline.run(shutdown_tx.subscribe()));

    // Button monitor feeding the scheduler
    let button_handle = if args.mock {
        let (monitor, rx) = ButtonMonitor::new(NullButton, &config.button);
        tokio::spawn(monitor.run(shutdown_tx.subscribe()));
        spawn_button_consumer(rx, Arc::clone(&scheduler), shutdown_tx.subscribe())
    } else {
        match GpioButton::new(config.button.pin) {
            Ok(input) => {
                let (monitor, rx) = ButtonMonitor::new(input, &config.button);
                tokio::spawn(monitor.run(shutdown_tx.subscribe()));
                spawn_button_consumer(rx, Arc::clone(&scheduler), shutdown_tx.subscribe())
            }
            Err(e) => {
                tracing::warn!("Button disabled: {e}");
                let (monitor, rx) = ButtonMonitor::new(NullButton, &config.button);
                tokio::spawn(monitor.run(shutdown_tx.subscribe()));
                spawn_button_consumer(rx, Arc::clone(&scheduler), shutdown_tx.subscribe())
            }
        }
    };

    // Admin API
    let port = args.http_port.unwrap_or(config.web_port);
    let web_server = web::WebServer::new(
        Arc::clone(&scheduler),
        display_handle,
        network_state,
        network_tx,
    );
    let web_shutdown = shutdown_tx.subscribe();
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.run_with_shutdown(port, web_shutdown).await {
            tracing::error!("Admin API error: {}", e);
        }
    });

    wait_for_shutdown().await;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(());

    for (name, handle) in [
        ("pipeline", pipeline_handle),
        ("network", network_handle),
        ("button", button_handle),
        ("web", web_handle),
    ] {
        tokio::select! {
            _ = handle => {},
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                tracing::warn!("{name} shutdown timeout");
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn spawn_button_consumer(
    mut rx: tokio::sync::watch::Receiver<Option<button::ButtonEvent>>,
    scheduler: Arc<AppScheduler>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let event = *rx.borrow_and_update();
                    if let Some(event) = event {
                        scheduler.on_button(event);
                    }
                }
            }
        }
    })
}

/// Write one test frame through the panel driver and exit
fn run_test_pattern(
    mut panel: impl display::PanelDriver,
    config: &Config,
) -> anyhow::Result<()> {
    tracing::info!("Rendering test pattern...");
    let mut canvas = Canvas::new(config.display.width, config.display.height);
    canvas.draw_border(Rgb::WHITE);
    canvas.draw_text_centered(
        config.display.height as i32 / 2 - 2,
        "TEST",
        Rgb::new(0, 200, 0),
    );
    panel.write_frame(&canvas.into_frame())?;
    tracing::info!("Test pattern complete");
    Ok(())
}

/// Initialize tracing/logging
///
/// Default level is "warn" to minimize SD card wear from log writes.
/// Use --verbose flag for "debug" level during development.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("led_matrix_display={}", level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}
