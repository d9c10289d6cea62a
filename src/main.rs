//! luxagent - Main Entry Point
//!
//! Loads configuration, builds the host peripherals and runs the control loop.

use clap::{Parser, Subcommand};
use luxagent::actuator::{Actuator, ControlActuator, LoggingPin, SysfsLed};
use luxagent::agent::{AgentLifecycle, Peripherals};
use luxagent::clock::SystemClock;
use luxagent::config::AgentConfig;
use luxagent::link::HostRadio;
use luxagent::observability::{init_logging, LoggingSettings};
use luxagent::sensor::IioLightSensor;
use luxagent::transport::mqtt::RumqttcStack;
use luxagent::watchdog::SoftwareWatchdog;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

/// Light sensor telemetry agent
#[derive(Parser)]
#[command(name = "luxagent")]
#[command(about = "Publishes illuminance readings over MQTT and obeys on/off commands")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "LUXAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting luxagent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config),
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

/// `-v` raises the level above whatever `LOG_LEVEL` says
fn init_observability(verbose: u8) {
    init_logging(&LoggingSettings::from_env().with_verbosity(verbose));
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(AgentConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["luxagent.toml", "config/luxagent.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(AgentConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, using built-in defaults");
            let config = AgentConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Bootstrap: build the host peripherals and hand them to the agent
fn build_peripherals(
    config: &AgentConfig,
) -> Result<Peripherals<HostRadio, RumqttcStack>, Box<dyn std::error::Error>> {
    let actuator: Box<dyn Actuator> = match &config.actuator.led_path {
        Some(path) => {
            info!("Driving LED at {}", path.display());
            Box::new(ControlActuator::new(SysfsLed::new(path)))
        }
        None => Box::new(ControlActuator::new(LoggingPin::default())),
    };

    Ok(Peripherals {
        radio: HostRadio::new(config.wifi.route_probe),
        stack: RumqttcStack::new()?,
        sensor: Box::new(IioLightSensor::new(&config.sensor.iio_device)),
        actuator,
        watchdog: Box::new(SoftwareWatchdog::new()),
        clock: Arc::new(SystemClock::new()),
    })
}

fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let peripherals = build_peripherals(&config)?;
    let mut coordinator = AgentLifecycle::start(&config, peripherals)?;

    info!(topic = %config.mqtt.topic, "Agent is running");
    coordinator.run()
}

fn handle_config_command(
    config: AgentConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
