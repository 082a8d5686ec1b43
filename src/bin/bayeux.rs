//! Bayeux command-line client.
//!
//! # Commands
//!
//! - `subscribe` - Print messages arriving on one or more channels
//! - `publish` - Publish one JSON message and wait for the server's receipt

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bayeux::{
    BatchPolicy, BayeuxClient, Config, ListenerResult, Message, MessageListener, SessionEvent,
    SessionListener, VERSION,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "bayeux")]
#[command(version = VERSION)]
#[command(about = "Bayeux publish/subscribe client", long_about = None)]
struct Cli {
    /// Config file (TOML); BAYEUX_* environment variables apply otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server URL, overrides the config
    #[arg(short, long, global = true)]
    url: Option<String>,

    /// Send queued messages without waiting for the next connect
    #[arg(long, global = true)]
    immediate: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print messages arriving on channels (wildcards allowed)
    Subscribe {
        /// Channels to subscribe to
        #[arg(required = true)]
        channels: Vec<String>,

        /// Exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Print whole messages instead of their data
        #[arg(long)]
        raw: bool,
    },

    /// Publish a JSON message
    Publish {
        /// Target channel
        channel: String,

        /// JSON payload (or - for stdin)
        data: Option<String>,

        /// Seconds to wait for the server's receipt
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env(),
    };
    if let Some(url) = cli.url {
        config = config.with_url(url);
    }
    if cli.immediate {
        config = config.with_batch_policy(BatchPolicy::Immediate);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Commands::Subscribe {
                channels,
                count,
                raw,
            } => cmd_subscribe(config, channels, count, raw).await,
            Commands::Publish {
                channel,
                data,
                timeout,
            } => cmd_publish(config, channel, data, Duration::from_secs(timeout)).await,
        }
    })
}

async fn cmd_subscribe(
    config: Config,
    channels: Vec<String>,
    count: Option<usize>,
    raw: bool,
) -> anyhow::Result<()> {
    let client = BayeuxClient::new(config)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let listener: Arc<MessageListener> = Arc::new(move |message: &Message| -> ListenerResult {
        tx.send(message.clone())?;
        Ok(())
    });
    let (_watcher, mut terminated) = watch_termination(&client);

    client.batched(|client| -> anyhow::Result<()> {
        for channel in &channels {
            client
                .subscribe(channel, &listener)
                .with_context(|| format!("Cannot subscribe to {channel}"))?;
        }
        Ok(())
    })?;
    client.handshake()?;

    let mut received = 0;
    loop {
        tokio::select! {
            Some(message) = rx.recv() => {
                if raw {
                    println!("{}", serde_json::to_string(&message)?);
                } else {
                    let data = message.data.unwrap_or(Value::Null);
                    println!("{} {}", message.channel, serde_json::to_string(&data)?);
                }
                received += 1;
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            },
            Some(reason) = terminated.recv() => {
                anyhow::bail!("Session ended: {reason}");
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn cmd_publish(
    config: Config,
    channel: String,
    data: Option<String>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let data: Value = serde_json::from_str(&read_input(data)?).context("Payload is not JSON")?;
    let client = BayeuxClient::new(config)?;
    let (_watcher, mut terminated) = watch_termination(&client);

    let receipt = client.publish(&channel, data)?;
    client.handshake()?;

    let outcome = tokio::select! {
        outcome = tokio::time::timeout(timeout, receipt) => {
            outcome.context("Timed out waiting for the publish receipt")?
        },
        Some(reason) = terminated.recv() => anyhow::bail!("Session ended: {reason}"),
    };
    outcome.with_context(|| format!("Publish to {channel} failed"))?;

    client.disconnect().await;
    eprintln!("Published to {channel}");
    Ok(())
}

/// Forward terminal session events. Keep the returned listener alive.
fn watch_termination(
    client: &BayeuxClient,
) -> (Arc<SessionListener>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: Arc<SessionListener> = Arc::new(move |event: &SessionEvent| -> ListenerResult {
        if let SessionEvent::Terminated(reason) = event {
            tx.send(reason.to_string())?;
        }
        Ok(())
    });
    client.add_session_listener(&listener);
    (listener, rx)
}

fn read_input(input: Option<String>) -> anyhow::Result<String> {
    match input.as_deref() {
        Some("-") | None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        },
        Some(text) => Ok(text.to_string()),
    }
}
