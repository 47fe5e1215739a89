//! Sensor Simulator CLI
//!
//! Runs a scenario through the simulation engine and publishes detections to
//! Lattice (or a mock transport on dry runs).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lattice_bridge::{HttpTransport, LatticeConfig, LatticePublisher, MetricsCollector, MockTransport};
use sensor_domain::Publisher;
use sensor_simulator::scenario::DEMO_SCENARIO;
use sensor_simulator::{ScenarioConfig, SimulationEngine};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sensor-sim")]
#[command(about = "Simulate entities observed by a sensor network and publish detections to Lattice")]
struct Args {
    /// Scenario YAML file (built-in demo when omitted)
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// Random seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Simulation speed multiplier
    #[arg(long)]
    speed: Option<f64>,

    /// Loop update rate in Hz
    #[arg(long)]
    rate: Option<f64>,

    /// Run duration in seconds (runs until interrupted when omitted)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Use the cooperative async loop instead of the blocking one
    #[arg(long)]
    async_mode: bool,

    /// Dry run (don't publish to Lattice)
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log a metrics summary every N seconds
    #[arg(long, value_name = "SECONDS")]
    status_every: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = LatticeConfig::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(args.json_logs.then(|| fmt::layer().json()))
        .with((!args.json_logs).then(fmt::layer))
        .init();

    info!(version = lattice_bridge::VERSION, "Starting sensor simulator");

    let scenario = match &args.scenario {
        Some(path) => ScenarioConfig::from_file(path)
            .with_context(|| format!("loading scenario {}", path.display()))?,
        None => {
            info!("No scenario given, using built-in demo");
            ScenarioConfig::from_yaml_str(DEMO_SCENARIO).context("parsing built-in scenario")?
        }
    };

    let mut settings = scenario.engine_settings();
    if let Some(speed) = args.speed {
        settings.simulation_speed = speed;
    }
    if let Some(rate) = args.rate {
        settings.update_rate_hz = rate;
    }
    let duration = args.duration.or(scenario.simulation.duration_seconds);

    let metrics = Arc::new(MetricsCollector::new());
    let mut engine = scenario
        .build_engine(settings)?
        .with_publisher(build_publisher(&config, args.dry_run)?)
        .with_metrics(metrics.clone());
    if let Some(seed) = args.seed {
        engine = engine.with_seed(seed);
    }

    info!(
        scenario = scenario.name.as_deref().unwrap_or("unnamed"),
        sensors = engine.sensors().len(),
        entities = engine.entities().len(),
        speed = settings.simulation_speed,
        rate_hz = settings.update_rate_hz,
        duration_seconds = ?duration,
        async_mode = args.async_mode,
        "Engine ready"
    );

    let reporter = args
        .status_every
        .filter(|&secs| secs > 0)
        .map(|secs| tokio::spawn(report_metrics(metrics.clone(), Duration::from_secs(secs))));

    let engine = if args.async_mode {
        engine.run_async(duration, shutdown_signal()).await?;
        engine
    } else {
        run_blocking(engine, duration).await?
    };

    if let Some(reporter) = reporter {
        reporter.abort();
    }

    let status = engine.status();
    info!(
        sensors = status.sensor_count,
        entities = status.entity_count,
        "Simulation complete"
    );
    let summary = metrics.summary();
    info!(
        uptime_seconds = summary.uptime_seconds,
        total_messages = summary.total_messages,
        total_errors = summary.total_errors,
        error_rate = summary.error_rate,
        "=== FINAL METRICS ==="
    );
    for (sensor_id, sensor) in &summary.sensors {
        info!(
            %sensor_id,
            messages = sensor.messages_sent,
            errors = sensor.errors,
            avg_latency_ms = sensor.avg_latency_ms,
            "Sensor metrics"
        );
    }

    Ok(())
}

/// Mock transport on dry runs or without an API key, REST otherwise.
fn build_publisher(config: &LatticeConfig, dry_run: bool) -> Result<Box<dyn Publisher>> {
    if dry_run || config.is_mock() {
        if !dry_run {
            warn!("LATTICE_API_KEY not set, running in mock mode");
        }
        let transport = MockTransport::new().without_recording();
        return Ok(Box::new(LatticePublisher::new(transport, config.publisher)));
    }

    let transport = HttpTransport::new(config).context("initializing Lattice transport")?;
    Ok(Box::new(LatticePublisher::new(transport, config.publisher)))
}

/// Drive the blocking loop on a blocking thread; a shutdown signal trips the
/// engine's stop handle.
async fn run_blocking(mut engine: SimulationEngine, duration: Option<f64>) -> Result<SimulationEngine> {
    let stop = engine.stop_handle();
    let mut task = tokio::task::spawn_blocking(move || {
        let outcome = engine.run(duration);
        (engine, outcome)
    });

    let (engine, outcome) = tokio::select! {
        joined = &mut task => joined?,
        () = shutdown_signal() => {
            stop.stop();
            task.await?
        }
    };
    outcome?;
    Ok(engine)
}

async fn report_metrics(metrics: Arc<MetricsCollector>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let summary = metrics.summary();
        info!(
            total_messages = summary.total_messages,
            total_errors = summary.total_errors,
            total_entities = summary.total_entities,
            active_entities = summary.active_entities,
            "Metrics"
        );
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
