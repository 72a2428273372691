//! odin-cli - Command-line tool for flashing devices in ODIN download mode.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use odin::flash::FileSource;
use odin::session::Session;
use odin::transport::usb::UsbTransport;
use std::io;
use std::path::PathBuf;

mod config;

use config::Config;

/// odin - A cross-platform tool for flashing devices in ODIN download mode.
#[derive(Parser)]
#[command(name = "odin")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output.
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List USB devices matching the ODIN vendor ID.
    ListDevices,

    /// Fetch and print the device's partition table.
    PrintPit,

    /// Flash an image file to a named partition.
    Flash {
        /// Path to the image file.
        image: PathBuf,

        /// Partition name as it appears in the PIT.
        partition: String,

        /// Mark this as a bootloader update.
        #[arg(long)]
        update_bootloader: bool,

        /// Request an EFS clear alongside this flash.
        #[arg(long)]
        efs_clear: bool,
    },

    /// End the current ODIN session (device stays connected).
    EndSession,

    /// Reboot the device out of download mode.
    Reboot,

    /// Shut the device down. Not supported on all hardware.
    Shutdown,

    /// Factory reset (erase userdata). Slow: up to 10 minutes.
    FactoryReset {
        /// Must be passed to confirm a destructive operation.
        #[arg(long)]
        yes: bool,
    },

    /// Enable T-Flash (flashing to removable media).
    EnableTflash,

    /// Generate shell completion scripts.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let mut config = Config::load();

    match &cli.command {
        Commands::ListDevices => cmd_list_devices()?,
        Commands::PrintPit => cmd_print_pit(&cli, &mut config)?,
        Commands::Flash {
            image,
            partition,
            update_bootloader,
            efs_clear,
        } => cmd_flash(
            &cli,
            &mut config,
            image,
            partition,
            *update_bootloader,
            *efs_clear,
        )?,
        Commands::EndSession => cmd_end_session(&cli, &mut config)?,
        Commands::Reboot => cmd_reboot(&cli, &mut config)?,
        Commands::Shutdown => cmd_shutdown(&cli, &mut config)?,
        Commands::FactoryReset { yes } => cmd_factory_reset(&cli, &mut config, *yes)?,
        Commands::EnableTflash => cmd_enable_tflash(&cli, &mut config)?,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, name, &mut io::stdout());
        },
    }

    Ok(())
}

fn connect(cli: &Cli, config: &mut Config) -> Result<Session<UsbTransport>> {
    if !cli.quiet {
        println!("{} Waiting for device in download mode...", style("⏳").yellow());
    }

    let remembered_pid = config.connection.remembered_device.as_ref().map(|d| d.pid);
    let transport = match remembered_pid {
        Some(pid) => UsbTransport::discover_filtered(odin::transport::VENDOR_ID, Some(pid))
            .or_else(|_| UsbTransport::discover_filtered(odin::transport::VENDOR_ID, None)),
        None => UsbTransport::discover_filtered(odin::transport::VENDOR_ID, None),
    }
    .context("No ODIN device found. Put the device into download mode and reconnect it.")?;
    let (vendor_id, product_id) = transport.device_info();

    let mut session = Session::new(transport);
    if let Some(timeout) = config.default_timeout() {
        session.set_default_timeout(timeout);
    }
    session.begin_session(false).context("Handshake failed")?;
    if !cli.quiet {
        println!("{} Session started", style("✓").green());
    }

    if let Err(e) = config.remember_device(vendor_id, product_id) {
        warn!("failed to remember USB device: {e}");
    }

    Ok(session)
}

fn cmd_list_devices() -> Result<()> {
    println!("{}", style("ODIN-capable USB devices").bold().underlined());
    let devices = odin::transport::usb::list_devices(odin::transport::VENDOR_ID)
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("  {}", style("No devices found").dim());
    } else {
        for device in &devices {
            println!(
                "  {} bus {:03} addr {:03} ({:04x}:{:04x})",
                style("•").green(),
                device.bus_number,
                device.address,
                device.vendor_id,
                device.product_id
            );
        }
    }
    Ok(())
}

fn cmd_print_pit(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    let pit = session.get_pit().context("Failed to fetch PIT")?;
    println!("{}", odin::format_partition_table(pit));
    session.end_session().context("Failed to end session")?;
    Ok(())
}

fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    image: &PathBuf,
    partition: &str,
    update_bootloader: bool,
    efs_clear: bool,
) -> Result<()> {
    let update_bootloader = update_bootloader || config.flash.update_bootloader;
    let efs_clear = efs_clear || config.flash.efs_clear;

    let mut source = FileSource::open(image)
        .with_context(|| format!("Failed to open image: {}", image.display()))?;

    let mut session = connect(cli, config)?;
    session.get_pit().context("Failed to fetch PIT")?;

    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)]
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Flashing {partition}"));

    let mut progress = |percent: f64| {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        pb.set_position(percent.round() as u64);
    };

    session
        .flash(
            &mut source,
            partition,
            &mut progress,
            update_bootloader,
            efs_clear,
        )
        .context("Flash failed")?;

    pb.finish_with_message("Complete!");

    session.end_session().context("Failed to end session")?;
    println!("{} Flashing completed successfully!", style("🎉").green().bold());
    Ok(())
}

fn cmd_end_session(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    session.end_session().context("Failed to end session")?;
    Ok(())
}

fn cmd_reboot(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    session.reboot().context("Failed to reboot device")?;
    println!("{} Device rebooting", style("🔄").cyan());
    Ok(())
}

fn cmd_shutdown(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    session.shutdown().context("Failed to shut down device")?;
    println!("{} Device shutting down", style("🔌").cyan());
    Ok(())
}

fn cmd_factory_reset(cli: &Cli, config: &mut Config, yes: bool) -> Result<()> {
    anyhow::ensure!(
        yes,
        "factory-reset erases userdata; re-run with --yes to confirm"
    );
    let mut session = connect(cli, config)?;
    println!(
        "{} Factory reset in progress, this can take several minutes...",
        style("⚠").yellow()
    );
    session
        .factory_reset()
        .context("Failed to factory reset device")?;
    println!("{} Factory reset complete", style("✓").green());
    Ok(())
}

fn cmd_enable_tflash(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    session
        .enable_tflash()
        .context("Failed to enable T-Flash")?;
    println!("{} T-Flash enabled", style("✓").green());
    Ok(())
}
