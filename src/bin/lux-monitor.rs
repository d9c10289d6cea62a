//! Lux Monitor
//!
//! Subscribes to the agent's topic and prints readings and commands as they
//! arrive. Reconnects with backoff when the broker goes away.

use clap::Parser;
use luxagent::actuator::Command;
use luxagent::config::AgentConfig;
use luxagent::observability::init_default_logging;
use luxagent::sensor::Reading;
use luxagent::transport::mqtt::MessageHandler;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

/// Watch a luxagent topic
#[derive(Parser)]
#[command(name = "lux-monitor")]
#[command(about = "Print light readings and commands published on the agent topic")]
#[command(version)]
struct Args {
    /// Read broker and topic from this agent configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MQTT broker URL (overrides the configuration file)
    #[arg(long)]
    broker_url: Option<String>,

    /// Topic to watch (overrides the configuration file)
    #[arg(long)]
    topic: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,
}

/// Output formatting options
#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Color-coded, one line per message
    Pretty,
    /// Tab-separated, for piping into other tools
    Compact,
}

/// What a payload on the agent topic is
#[derive(Debug, Clone, PartialEq)]
enum MessageType {
    Reading(Reading),
    Command(Command),
    Unknown,
}

impl MessageType {
    fn classify(payload: &str) -> Self {
        if let Ok(value) = payload.trim().parse::<f64>() {
            if value == Reading::SENTINEL {
                return Self::Reading(Reading::Invalid);
            }
            return Self::Reading(Reading::Lux(value));
        }
        match MessageHandler::decode_command(payload.as_bytes()) {
            Command::Unknown => Self::Unknown,
            command => Self::Command(command),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Reading(Reading::Lux(_)) => "READING",
            Self::Reading(Reading::Invalid) => "INVALID",
            Self::Command(_) => "COMMAND",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Self::Reading(Reading::Lux(_)) => "\x1b[1;32m", // Green
            Self::Reading(Reading::Invalid) => "\x1b[1;31m", // Red
            Self::Command(_) => "\x1b[1;34m",              // Blue
            Self::Unknown => "\x1b[0;37m",                 // White
        }
    }
}

const RESET: &str = "\x1b[0m";

fn format_message(elapsed: f64, payload: &str, format: &OutputFormat) -> String {
    let msg_type = MessageType::classify(payload);
    let detail = match &msg_type {
        MessageType::Reading(Reading::Lux(lux)) => format!("{lux:.2} lx"),
        MessageType::Command(command) => format!("{command:?} ({payload:?})"),
        _ => payload.to_string(),
    };

    match format {
        OutputFormat::Compact => format!("{elapsed:.1}\t{}\t{}", msg_type.label(), payload.trim()),
        OutputFormat::Pretty => {
            let color = msg_type.color_code();
            let label = msg_type.label();
            format!("{color}[{label}]{RESET} +{elapsed:.1}s {detail}")
        }
    }
}

fn setup_mqtt_client(
    config: &AgentConfig,
) -> Result<(AsyncClient, EventLoop), Box<dyn std::error::Error>> {
    let endpoint = config.broker_endpoint()?;
    let client_id = format!("lux-monitor-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host, endpoint.port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(60));
    mqtt_options.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
    Ok((client, eventloop))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_default_logging();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::default(),
    };
    if let Some(url) = &args.broker_url {
        config.mqtt.broker_url = url.clone();
    }
    if let Some(topic) = &args.topic {
        config.mqtt.topic = topic.clone();
    }

    println!("luxagent - Lux Monitor");
    println!("======================");
    println!("MQTT Broker: {}", config.mqtt.broker_url);
    println!("Topic: {}", config.mqtt.topic);
    println!("Press Ctrl+C to stop monitoring");
    println!();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received...");
        shutdown_clone.store(true, Ordering::Relaxed);
    });

    let started = Instant::now();
    let mut reconnect_delay = 1;
    const MAX_RECONNECT_DELAY: u64 = 30;

    while !shutdown.load(Ordering::Relaxed) {
        info!("Connecting to MQTT broker...");
        let (client, mut eventloop) = setup_mqtt_client(&config)?;

        if let Err(e) = client.subscribe(&config.mqtt.topic, QoS::AtMostOnce).await {
            error!("Failed to subscribe: {}", e);
            tokio::time::sleep(std::time::Duration::from_secs(reconnect_delay)).await;
            reconnect_delay = std::cmp::min(reconnect_delay * 2, MAX_RECONNECT_DELAY);
            continue;
        }

        loop {
            if shutdown.load(Ordering::Relaxed) {
                let _ = tokio::time::timeout(
                    std::time::Duration::from_millis(500),
                    client.disconnect(),
                )
                .await;
                return Ok(());
            }

            let poll_result =
                tokio::time::timeout(std::time::Duration::from_millis(100), eventloop.poll()).await;

            match poll_result {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    let payload = String::from_utf8_lossy(&publish.payload);
                    let elapsed = started.elapsed().as_secs_f64();
                    println!("{}", format_message(elapsed, &payload, &args.format));
                }
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!("✅ Connected to MQTT broker");
                    reconnect_delay = 1;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("MQTT connection lost: {}", e);
                    break;
                }
                Err(_) => continue,
            }
        }

        if !shutdown.load(Ordering::Relaxed) {
            warn!("Reconnecting in {} seconds...", reconnect_delay);
            tokio::time::sleep(std::time::Duration::from_secs(reconnect_delay)).await;
            reconnect_delay = std::cmp::min(reconnect_delay * 2, MAX_RECONNECT_DELAY);
        }
    }

    Ok(())
}
