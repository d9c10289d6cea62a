//! luxagent Command Injection Utility
//!
//! Publishes an on/off command to the agent's topic, exactly as a remote
//! controller would.
//!
//! ## Usage
//!
//! ```bash
//! # Switch the output on
//! inject-command on
//!
//! # Switch it off on a private broker
//! inject-command off --broker-url mqtt://localhost:1883
//!
//! # Send arbitrary text to see how the agent classifies it
//! inject-command raw --payload "please turn on now"
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use luxagent::config::AgentConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::path::PathBuf;
use tokio::time::{timeout, Duration};

#[derive(Parser)]
#[command(
    name = "inject-command",
    about = "Publish on/off commands to a running luxagent",
    long_about = "Publishes a command payload to the agent's topic.\nThe agent switches its output on for payloads containing \"on\" and off for \"off\"."
)]
struct Args {
    #[command(subcommand)]
    command: CommandKind,

    /// Read broker and topic from this agent configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MQTT broker URL (overrides the configuration file)
    #[arg(long)]
    broker_url: Option<String>,

    /// Topic to publish on (overrides the configuration file)
    #[arg(long)]
    topic: Option<String>,

    /// Seconds to wait for the broker
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum CommandKind {
    /// Switch the output on
    On,
    /// Switch the output off
    Off,
    /// Send an arbitrary payload
    Raw {
        #[arg(long)]
        payload: String,
    },
}

impl CommandKind {
    fn payload(&self) -> &str {
        match self {
            CommandKind::On => "on",
            CommandKind::Off => "off",
            CommandKind::Raw { payload } => payload,
        }
    }
}

fn resolve_target(
    args: &Args,
) -> Result<(AgentConfig, String, u16), Box<dyn std::error::Error>> {
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

    let endpoint = config.broker_endpoint()?;
    Ok((config, endpoint.host, endpoint.port))
}

/// Drive the event loop until `done` accepts an event
async fn wait_for<F>(
    eventloop: &mut EventLoop,
    mut done: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnMut(&Event) -> bool,
{
    loop {
        let event = eventloop.poll().await?;
        if done(&event) {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let (config, host, port) = resolve_target(&args)?;
    let payload = args.command.payload().to_string();
    let deadline = Duration::from_secs(args.timeout_secs);

    let client_id = format!(
        "inject-command-{}",
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs()
    );
    let mut mqttoptions = MqttOptions::new(client_id, &host, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    println!("Connecting to MQTT broker {host}:{port}...");
    timeout(
        deadline,
        wait_for(&mut eventloop, |event| {
            matches!(event, Event::Incoming(Packet::ConnAck(_)))
        }),
    )
    .await
    .map_err(|_| "timed out waiting for CONNACK")??;

    client
        .publish(&config.mqtt.topic, QoS::AtMostOnce, false, payload.clone())
        .await?;
    timeout(
        deadline,
        wait_for(&mut eventloop, |event| {
            matches!(event, Event::Outgoing(Outgoing::Publish(_)))
        }),
    )
    .await
    .map_err(|_| "timed out sending command")??;

    println!("✓ Sent {payload:?} to {}", config.mqtt.topic);

    client.disconnect().await?;
    // Flush the DISCONNECT; an error here only means the broker closed first
    let _ = timeout(Duration::from_millis(500), eventloop.poll()).await;
    Ok(())
}
