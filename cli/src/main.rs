// dropway: command-line front-end
//
// Send a file to whoever knows the password, receive one, or run the
// rendezvous server that pairs the two.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dropway_core::{
    ClientConfig, EventSink, Receiver, RendezvousConfig, RendezvousServer, Sender, TransferEvent,
    TransferType, Version,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "dropway")]
#[command(about = "dropway: password-paired encrypted file transfer", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file and print the password for the receiver
    Send {
        file: PathBuf,
        /// Rendezvous server (host:port), overrides the config file
        #[arg(short, long)]
        rendezvous: Option<String>,
    },
    /// Receive a file using the sender's password
    Receive {
        password: String,
        /// Where to write the payload
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Rendezvous server (host:port), overrides the config file
        #[arg(short, long)]
        rendezvous: Option<String>,
        /// Skip the direct connection attempt
        #[arg(long)]
        relay: bool,
    },
    /// Run the rendezvous server until Ctrl-C
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
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

    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Serve { .. }, false) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Send { file, rendezvous } => cmd_send(file, rendezvous).await,
        Commands::Receive {
            password,
            output,
            rendezvous,
            relay,
        } => cmd_receive(password, output, rendezvous, relay).await,
        Commands::Serve { port } => cmd_serve(port).await,
        Commands::Config { action } => cmd_config(action).await,
    }
}

fn client_config(config: &config::Config, rendezvous: Option<String>) -> ClientConfig {
    let mut client = ClientConfig::new(rendezvous.unwrap_or_else(|| config.rendezvous_addr.clone()));
    client.version = Some(Version::current());
    client.force_relay = config.force_relay;
    client
}

/// Print engine events until the engine drops its sink.
fn spawn_reporter(mut events: mpsc::UnboundedReceiver<TransferEvent>, total: Option<u64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::Password(password) => {
                    println!();
                    println!("  Password: {}", password.bright_yellow().bold());
                    println!();
                    println!("  On the other machine run:");
                    println!("    {}", format!("dropway receive {}", password).bright_green());
                    println!();
                    println!("{}", "Waiting for receiver...".dimmed());
                }
                TransferEvent::Mode(mode) => {
                    let label = match mode {
                        TransferType::Direct => "direct connection".bright_cyan(),
                        TransferType::Relay => "relay".bright_magenta(),
                    };
                    println!("{} Transferring via {}", "•".bright_green(), label);
                }
                TransferEvent::Progress { bytes } => match total {
                    Some(total) if total > 0 => {
                        let percent = bytes.saturating_mul(100) / total;
                        eprint!("\r  {} / {} bytes ({}%)", bytes, total, percent);
                    }
                    _ => eprint!("\r  {} bytes", bytes),
                },
            }
        }
        eprintln!();
    })
}

async fn cmd_send(file: PathBuf, rendezvous: Option<String>) -> Result<()> {
    let config = config::Config::load()?;
    let client = client_config(&config, rendezvous);

    let handle = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let size = handle
        .metadata()
        .await
        .context("Failed to read file metadata")?
        .len();
    let declared = i64::try_from(size).context("File too large")?;

    println!(
        "{} {} ({} bytes) via {}",
        "Sending".bold(),
        file.display().to_string().bright_cyan(),
        size,
        client.rendezvous_addr
    );

    let (sink, events) = EventSink::channel();
    let reporter = spawn_reporter(events, Some(size));
    let sender = Sender::new(client).with_events(sink);

    let result = sender.send(handle, declared).await;
    drop(sender);
    let _ = reporter.await;

    let mode = result.context("Transfer failed")?;
    println!("{} Sent {} bytes ({})", "✓".green(), size, mode);
    Ok(())
}

fn default_output(password: &str) -> PathBuf {
    let id = password.split('-').next().unwrap_or("0");
    PathBuf::from(format!("dropway-{}.bin", id))
}

async fn cmd_receive(
    password: String,
    output: Option<PathBuf>,
    rendezvous: Option<String>,
    relay: bool,
) -> Result<()> {
    let config = config::Config::load()?;
    let mut client = client_config(&config, rendezvous);
    client.force_relay |= relay;

    let path = output.unwrap_or_else(|| default_output(&password));
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let (sink, events) = EventSink::channel();
    let reporter = spawn_reporter(events, None);
    let receiver = Receiver::new(client).with_events(sink);

    let result = receiver.receive(password.trim(), &mut file).await;
    drop(receiver);
    let _ = reporter.await;

    match result {
        Ok(mode) => {
            file.sync_all().await.context("Failed to flush output")?;
            println!(
                "{} Received into {} ({})",
                "✓".green(),
                path.display().to_string().bright_cyan(),
                mode
            );
            Ok(())
        }
        Err(e) => {
            drop(file);
            discard_partial(&path).await;
            Err(e).context("Transfer failed")
        }
    }
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Could not remove partial file {}: {}", path.display(), e);
    }
}

async fn cmd_serve(port: Option<u16>) -> Result<()> {
    let config = config::Config::load()?;
    let port = port.unwrap_or(config.server_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let server = RendezvousServer::with_config(RendezvousConfig {
        receiver_timeout: Duration::from_secs(config.receiver_timeout_secs),
        ..RendezvousConfig::default()
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        tracing::info!("Ctrl-C received, shutting down");
    };

    let (bound, serve) = server
        .bind(addr, shutdown)
        .with_context(|| format!("Failed to bind {}", addr))?;

    println!(
        "{} Rendezvous {} listening on {}",
        "✓".green(),
        Version::current(),
        bound.to_string().bright_cyan()
    );
    println!("{}", "Press Ctrl-C to stop".dimmed());

    serve.await;
    println!("{} Stopped", "✓".green());
    Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
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
                println!("  {:<24} {}", key.bright_cyan(), value);
            }

            println!();
            println!(
                "  {} {}",
                "File:".dimmed(),
                config::Config::config_file()?.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_receive() {
        let cli = Cli::try_parse_from([
            "dropway",
            "receive",
            "7-apple-river-stone",
            "-o",
            "out.bin",
            "--relay",
        ])
        .unwrap();
        match cli.command {
            Commands::Receive {
                password,
                output,
                relay,
                ..
            } => {
                assert_eq!(password, "7-apple-river-stone");
                assert_eq!(output, Some(PathBuf::from("out.bin")));
                assert!(relay);
            }
            _ => panic!("expected receive"),
        }
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["dropway", "serve", "--port", "9000", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }

    #[test]
    fn test_flag_overrides_config_addr() {
        let config = config::Config::default();
        let client = client_config(&config, Some("relay.example.org:9009".into()));
        assert_eq!(client.rendezvous_addr, "relay.example.org:9009");
        assert_eq!(client.version, Some(Version::current()));

        let client = client_config(&config, None);
        assert_eq!(client.rendezvous_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_default_output_uses_id() {
        assert_eq!(
            default_output("12-apple-river-stone"),
            PathBuf::from("dropway-12.bin")
        );
    }
}
