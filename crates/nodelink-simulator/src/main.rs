//! Desktop simulator for the nodelink sensor node.
//!
//! Runs the real `nodelink-core` scheduler against a simulated radio,
//! broker, ADC and LED (see [`world`]), on a simulated millisecond clock
//! that starts just below the `u32` wrap so every run crosses a rollover.
//!
//! ```text
//! RUST_LOG=debug nodelink-simulator --scenario link-drop --seconds 40
//! ```

mod world;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use log::{error, info, warn};

use nodelink_core::config::Config;
use nodelink_core::connectivity::ConnectivityManager;
use nodelink_core::indicator::Indicator;
use nodelink_core::scheduler::Scheduler;
use nodelink_core::sensors::OnboardTemperature;
use nodelink_core::session::{SessionManager, SessionSettings};

use crate::world::{Scenario, SharedWorld, SimAdc, SimBroker, SimLed, SimPump, SimRadio, World};

// ---------------------------------------------------------------------------
// Loop constants
// ---------------------------------------------------------------------------

/// Simulated time advanced per loop iteration.
const STEP_MS: u32 = 10;

/// How long a requested shutdown may take before the run gives up on it.
const SHUTDOWN_GRACE_MS: u32 = 5_000;

type Node = Scheduler<SimRadio, SimBroker, OnboardTemperature<SimAdc>, SimPump, SimLed>;

/// Drive the nodelink core against a simulated network.
#[derive(Parser, Debug)]
#[command(name = "nodelink-simulator", version, about)]
struct Cli {
    /// Node configuration (TOML). Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Which simulated fault to run
    #[arg(short, long, value_enum, default_value_t = Scenario::Healthy)]
    scenario: Scenario,

    /// Simulated run time before shutdown is requested
    #[arg(long, default_value_t = 30)]
    seconds: u32,

    /// Initial value of the millisecond clock
    #[arg(long, default_value_t = u32::MAX - 10_000)]
    start_ms: u32,

    /// Sleep between iterations so the run takes wall-clock time
    #[arg(long)]
    realtime: bool,
}

fn default_config() -> Config {
    let mut config = Config::default();
    config.internet.ssid = String::from("greenhouse");
    config.internet.password = String::from("hunter22");
    config.broker.address = String::from("192.168.4.1");
    config.broker.client_id = String::from("nodelink-sim");
    config
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        info!("No configuration file given, using built-in defaults");
        return Ok(default_config());
    };

    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).wrap_err_with(|| format!("failed to parse {}", path.display()))
}

fn build_node(config: &Config, world: &SharedWorld) -> Result<Node> {
    let settings = SessionSettings::from_config(&config.broker).map_err(|e| {
        error!("Invalid broker configuration: {e}");
        eyre!("invalid broker configuration: {e}")
    })?;

    let radio = SimRadio::new(world.clone());
    let connectivity = ConnectivityManager::initialize(radio, &config.internet).map_err(|e| {
        error!("Network setup failed: {e}");
        eyre!("network setup failed: {e}")
    })?;

    let sensor = OnboardTemperature::new(SimAdc::new(world.clone()));
    let session = SessionManager::new(SimBroker::new(world.clone()), sensor, settings);

    Ok(Scheduler::new(
        connectivity,
        session,
        SimPump::new(world.clone()),
        Indicator::new(SimLed),
    ))
}

/// Advance the clock by one step and run one loop iteration.
fn step(world: &SharedWorld, node: &mut Node, now: &mut u32, realtime: bool) {
    *now = now.wrapping_add(STEP_MS);
    world.borrow_mut().set_now(*now);
    node.run_once(*now);

    if let Some(message) = node.session_mut().take_control_message() {
        info!(
            "Control message on {}: {}",
            message.topic,
            message.text().unwrap_or("<binary>")
        );
    }

    if realtime {
        thread::sleep(Duration::from_millis(u64::from(STEP_MS)));
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!(
        "Starting nodelink simulator: scenario {:?}, {} s, clock at {}",
        cli.scenario, cli.seconds, cli.start_ms
    );

    let config = load_config(cli.config.as_deref())?;
    let world = World::shared(cli.scenario, cli.start_ms);
    let mut node = build_node(&config, &world)?;

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    let mut now = cli.start_ms;
    let run_ms = cli.seconds.saturating_mul(1_000);
    let mut elapsed = 0;
    while elapsed < run_ms {
        step(&world, &mut node, &mut now, cli.realtime);
        elapsed += STEP_MS;
    }

    info!("Requesting shutdown");
    node.request_shutdown();
    let mut grace = 0;
    while !node.is_shut_down() && grace < SHUTDOWN_GRACE_MS {
        step(&world, &mut node, &mut now, cli.realtime);
        grace += STEP_MS;
    }

    let stats = node.session().stats();
    info!(
        "Done after {} iterations: {} join attempts, {} sessions",
        node.iterations(),
        node.connectivity().attempts(),
        stats.sessions_started
    );
    info!(
        "{} publishes ({} failed), {} control messages",
        stats.publishes, stats.publish_failures, stats.control_messages
    );
    info!(
        "Broker saw {} publishes, {} sessions still live, {} events dropped",
        world.borrow().published(),
        world.borrow().live_sessions(),
        node.dropped_events()
    );

    if !node.is_shut_down() {
        warn!("Session did not shut down within {} ms", SHUTDOWN_GRACE_MS);
    }
    Ok(())
}
