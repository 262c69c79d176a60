//! ymodem-cli - Command-line YMODEM file sender/receiver.

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use ymodem::{Receiver, Sender, Stage, YmodemConfig};

mod file_io;
mod serial;

use file_io::{FsFileSink, FsFileSource};
use serial::SerialTransport;

/// ymodem - A portable command-line YMODEM sender/receiver.
#[derive(Parser)]
#[command(name = "ymodem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, env = "YMODEM_PORT")]
    port: Option<String>,

    /// Baud rate for data transfer.
    #[arg(short, long, default_value = "115200", env = "YMODEM_BAUD")]
    baud: u32,

    /// Verbose output level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Timeout for a single character read, in milliseconds.
    #[arg(long, default_value = "3000", env = "YMODEM_WAIT_CHAR_TIMEOUT_MS")]
    wait_char_timeout_ms: u64,

    /// Timeout for a single packet read, in milliseconds.
    #[arg(long, default_value = "3000", env = "YMODEM_WAIT_PACKET_TIMEOUT_MS")]
    wait_packet_timeout_ms: u64,

    /// Interval between repeated handshake characters, in milliseconds.
    #[arg(long, default_value = "1000", env = "YMODEM_HANDSHAKE_INTERVAL_MS")]
    handshake_interval_ms: u64,

    /// Total time budget for the handshake phase, in milliseconds.
    #[arg(long, default_value = "60000", env = "YMODEM_HANDSHAKE_TIMEOUT_MS")]
    handshake_timeout_ms: u64,

    /// Maximum consecutive errors for a single packet before failing.
    #[arg(long, default_value = "5", env = "YMODEM_MAX_ERRORS")]
    max_errors: u32,

    /// Number of CAN bytes sent to signal an abort.
    #[arg(long, default_value = "7", env = "YMODEM_CAN_SEND_COUNT")]
    can_send_count: u32,

    /// Maximum filename length accepted in packet 0.
    #[arg(long, default_value = "256", env = "YMODEM_MAX_FILENAME_LEN")]
    max_filename_len: usize,

    /// Maximum payload size (the STX block length).
    #[arg(long, default_value = "1024", env = "YMODEM_MAX_PAYLOAD")]
    max_payload: usize,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Send a single file.
    Send {
        /// Path to the file to send.
        file: PathBuf,
    },

    /// Receive a single file into a directory.
    Receive {
        /// Destination directory (must already exist).
        #[arg(default_value = ".")]
        output_dir: PathBuf,
    },

    /// List available serial ports.
    ListPorts,
}

impl Cli {
    fn ymodem_config(&self) -> YmodemConfig {
        YmodemConfig {
            wait_char_timeout: Duration::from_millis(self.wait_char_timeout_ms),
            wait_packet_timeout: Duration::from_millis(self.wait_packet_timeout_ms),
            handshake_interval: Duration::from_millis(self.handshake_interval_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_errors: self.max_errors,
            can_send_count: self.can_send_count,
            max_filename_len: self.max_filename_len,
            max_payload: self.max_payload,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    match &cli.command {
        Commands::Send { file } => cmd_send(&cli, file)?,
        Commands::Receive { output_dir } => cmd_receive(&cli, output_dir)?,
        Commands::ListPorts => cmd_list_ports()?,
    }

    Ok(())
}

fn get_port(cli: &Cli) -> Result<String> {
    match &cli.port {
        Some(p) => Ok(p.clone()),
        None => serial::list_ports()?
            .into_iter()
            .next()
            .context("no serial port specified and none detected; use -p to specify one"),
    }
}

fn cmd_send(cli: &Cli, file: &PathBuf) -> Result<()> {
    let port_name = get_port(cli)?;
    println!(
        "{} Using port: {} @ {} baud",
        style("\u{1F50C}").cyan(),
        port_name,
        cli.baud
    );

    let transport = SerialTransport::open(&port_name, cli.baud)?;
    let source = FsFileSource::new(file.clone());
    let filename = source.filename();

    let mut sender = Sender::new(transport, source, cli.ymodem_config());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("Sending {filename}..."));
    pb.enable_steady_tick(Duration::from_millis(120));

    let result = sender.send(&filename);
    pb.finish_and_clear();

    result.with_context(|| format!("send failed at stage {:?}", sender.stage()))?;
    println!("{} Sent {filename}", style("\u{2713}").green());
    Ok(())
}

fn cmd_receive(cli: &Cli, output_dir: &PathBuf) -> Result<()> {
    anyhow::ensure!(
        output_dir.is_dir(),
        "output directory {} does not exist",
        output_dir.display()
    );

    let port_name = get_port(cli)?;
    println!(
        "{} Using port: {} @ {} baud",
        style("\u{1F50C}").cyan(),
        port_name,
        cli.baud
    );

    let transport = SerialTransport::open(&port_name, cli.baud)?;
    let sink = FsFileSink::new(output_dir.clone());
    let mut receiver = Receiver::new(transport, sink, cli.ymodem_config());

    println!(
        "{} Waiting for sender...",
        style("\u{23F3}").yellow()
    );
    let result = receiver.receive();
    let stage = receiver.stage();
    let info = result.with_context(|| format!("receive failed at stage {stage:?}"))?;

    if stage == Stage::Finished && info.filename.is_empty() {
        println!("{} Batch terminator received, nothing to save", style("\u{2139}").blue());
    } else {
        println!(
            "{} Received {} ({} bytes) into {}",
            style("\u{2713}").green(),
            info.filename,
            info.size,
            output_dir.display()
        );
    }
    Ok(())
}

fn cmd_list_ports() -> Result<()> {
    println!("{}", style("Available Serial Ports").bold().underlined());
    let ports = serial::list_ports()?;
    if ports.is_empty() {
        println!("  {}", style("No serial ports found").dim());
    } else {
        for port in ports {
            println!("  {} {}", style("\u{2022}").green(), style(port).cyan());
        }
    }
    Ok(())
}
