// adradio — command-line front end
//
// Sends and listens for advertisement messages. Without radio hardware the
// nodes share a UDP multicast group, so several terminals on one machine
// (or one LAN) can talk to each other.

mod config;

use adradio_core::{RadioConfig, RadioError, RadioLink, ReceivedMessage, UdpAirTransport};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "adradio")]
#[command(about = "adradio — connectionless messaging over advertisements", long_about = None)]
#[command(version)]
struct Cli {
    /// Channel to use for this invocation (overrides config)
    #[arg(short, long, global = true, allow_negative_numbers = true)]
    channel: Option<i64>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast one message
    Send {
        message: String,
        /// Treat MESSAGE as hex-encoded bytes
        #[arg(long)]
        hex: bool,
    },
    /// Print incoming messages
    Listen {
        /// Stop after this many messages (at least 1)
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
        count: Option<u64>,
        /// Print payloads as hex
        #[arg(long)]
        raw: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Send { message, hex } => cmd_send(cli.channel, message, hex).await,
        Commands::Listen { count, raw } => cmd_listen(cli.channel, count, raw).await,
        Commands::Config { action } => cmd_config(action),
    }
}

async fn open_link(channel: Option<i64>) -> Result<Arc<RadioLink>> {
    let config = config::Config::load()?;

    let radio = match channel {
        Some(channel) => RadioConfig::new(channel)?,
        None => config.radio,
    };

    let air = config.air_config();
    let transport = UdpAirTransport::bind(air.clone())
        .await
        .with_context(|| format!("Failed to join {}:{}", air.group, air.port))?;
    tracing::debug!("Local UDP port {}", transport.local_port());

    Ok(Arc::new(RadioLink::with_config(Arc::new(transport), radio)))
}

async fn cmd_send(channel: Option<i64>, message: String, as_hex: bool) -> Result<()> {
    let payload = if as_hex {
        hex::decode(message.trim()).context("Invalid hex payload")?
    } else {
        message.into_bytes()
    };

    let link = open_link(channel).await?;
    let sequence = link.sequence();
    link.send_bytes(&payload).await?;

    println!(
        "{} Sent {} bytes on channel {} (seq {})",
        "✓".green(),
        payload.len(),
        link.channel().to_string().bright_cyan(),
        sequence
    );

    Ok(())
}

async fn cmd_listen(channel: Option<i64>, count: Option<u64>, raw: bool) -> Result<()> {
    let link = open_link(channel).await?;

    let stopper = link.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.shutdown();
        }
    });

    println!(
        "{} on channel {} {}",
        "Listening".bold(),
        link.channel().to_string().bright_cyan(),
        "(Ctrl-C to stop)".dimmed()
    );
    println!();

    let mut received = 0u64;
    loop {
        match link.receive_full().await {
            Ok(Some(message)) => {
                print_message(&message, raw);
                received += 1;
                if count == Some(received) {
                    break;
                }
            }
            Ok(None) => continue,
            Err(RadioError::Shutdown) => break,
            Err(e) => return Err(e).context("Receive failed"),
        }
    }

    println!();
    println!("{} {} message(s) received", "✓".green(), received);
    Ok(())
}

fn print_message(message: &ReceivedMessage, raw: bool) {
    let body = if raw {
        hex::encode(&message.payload)
    } else {
        match message.clone().into_text() {
            Ok(text) => text,
            Err(_) => format!("<{}>", hex::encode(&message.payload)),
        }
    };

    println!(
        "{} {} {} {}",
        chrono::Local::now().format("%H:%M:%S%.3f").to_string().dimmed(),
        hex::encode(&message.sender_address).bright_yellow(),
        format!("{:>4} dBm", message.rssi).dimmed(),
        body
    );
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }

            println!();
            println!(
                "  {}",
                config::Config::config_file()?.display().to_string().dimmed()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_count_must_be_positive() {
        assert!(Cli::try_parse_from(["adradio", "listen", "--count", "0"]).is_err());

        let cli = Cli::try_parse_from(["adradio", "listen", "-n", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Listen {
                count: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_global_channel_accepts_negative_for_validation() {
        let cli = Cli::try_parse_from(["adradio", "send", "hi", "--channel", "-1"]).unwrap();
        assert_eq!(cli.channel, Some(-1));
        assert!(RadioConfig::new(cli.channel.unwrap()).is_err());
    }
}
