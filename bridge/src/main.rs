use std::{
    io::{Read, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{anyhow, Context, Result};
use cades_bridge::Session;
use cades_common::{ensure_channel, framing, BridgeConfig, ChannelKind, ChannelPath};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "cades-bridge")]
#[command(about = "Inspect and exercise the CAdES engine channels")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON config file; CADES_CHANNEL_DIR / CADES_FIFO_MODE are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or reuse) both channels and report their state
    Ensure {
        /// Channel directory
        dir: Option<PathBuf>,
    },
    /// Write a request into the `in` channel
    Send {
        /// Request text
        message: String,
        /// Channel directory
        dir:     Option<PathBuf>,
        /// Length-prefix the request
        #[arg(long)]
        framed:  bool,
    },
    /// Read from the `out` channel. Blocks until the engine writes.
    Recv {
        /// Channel directory
        dir:    Option<PathBuf>,
        /// Expect a length-prefixed frame
        #[arg(long)]
        framed: bool,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = args.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::from_env(),
    };

    match args.command {
        Commands::Ensure { dir } => {
            let root = ChannelPath::new(channel_dir(dir, &config)?)?;
            let mut session = Session::with_config(&config);
            let opened = session.open(root.dir());

            println!("in:    {}", root.endpoint(ChannelKind::In).display());
            println!("out:   {}", root.endpoint(ChannelKind::Out).display());
            println!("state: {:?}", session.state());

            session.close();
            opened.with_context(|| format!("Channels in {:?} are not usable", root.dir()))?;
        }

        Commands::Send {
            message,
            dir,
            framed,
        } => {
            let root = ChannelPath::new(channel_dir(dir, &config)?)?;
            let mut channel = ensure_channel(
                ChannelKind::In,
                &root.endpoint(ChannelKind::In),
                config.fifo_mode,
            )?;

            if framed {
                framing::write_frame(&mut channel, message.as_bytes())
                    .context("Failed to write frame")?;
            } else {
                channel
                    .write_all(message.as_bytes())
                    .context("Failed to write request")?;
                channel.flush().context("Failed to flush request")?;
            }
            info!("Sent {} bytes to {:?}", message.len(), channel.path());
        }

        Commands::Recv { dir, framed } => {
            let root = ChannelPath::new(channel_dir(dir, &config)?)?;
            let mut channel = ensure_channel(
                ChannelKind::Out,
                &root.endpoint(ChannelKind::Out),
                config.fifo_mode,
            )?;

            let payload = if framed {
                framing::read_frame(&mut channel, config.max_frame_len)
                    .context("Failed to read frame")?
            } else {
                let mut buf = vec![0u8; 64 * 1024];
                let n = channel.read(&mut buf).context("Failed to read response")?;
                buf.truncate(n);
                buf
            };
            info!("Received {} bytes from {:?}", payload.len(), channel.path());
            println!("{}", String::from_utf8_lossy(&payload));
        }
    }

    Ok(())
}

fn channel_dir(arg: Option<PathBuf>, config: &BridgeConfig) -> Result<PathBuf> {
    arg.or_else(|| config.channel_dir.clone())
        .ok_or_else(|| anyhow!("No channel directory given and CADES_CHANNEL_DIR is not set"))
}
