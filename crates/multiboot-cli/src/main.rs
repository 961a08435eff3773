//! gba-multiboot — boot a console from an image sent over the link port.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};

use multiboot_core::config::MultibootConfig;
use multiboot_core::Image;
use multiboot_session::{Session, SessionOptions, SessionReport, Shutdown, SpiTransport};

mod progress;

#[derive(Parser, Debug)]
#[command(name = "gba-multiboot", version, about = "Send a multiboot image over an SPI link cable")]
struct Args {
    /// Image to send (at most 256 KiB)
    #[arg(required_unless_present = "init_config")]
    rom: Option<PathBuf>,

    /// spidev node wired to the link port
    #[arg(long)]
    device: Option<PathBuf>,

    /// Stop waiting for the console to power on after SECS seconds
    #[arg(long, value_name = "SECS")]
    handshake_timeout: Option<u64>,

    /// Stop waiting for the transfer acknowledgment after SECS seconds
    #[arg(long, value_name = "SECS")]
    ack_timeout: Option<u64>,

    /// Fail if the console reports a different final CRC
    #[arg(long)]
    verify_crc: bool,

    /// Print the session report as JSON
    #[arg(long)]
    json: bool,

    /// Write a default config file if none exists
    #[arg(long)]
    init_config: bool,
}

impl Args {
    /// Command-line flags win over the config file and environment.
    fn apply(&self, config: &mut MultibootConfig) {
        if let Some(device) = &self.device {
            config.device.path = device.clone();
        }
        if let Some(secs) = self.handshake_timeout {
            config.session.handshake_timeout_secs = secs;
        }
        if let Some(secs) = self.ack_timeout {
            config.session.ack_timeout_secs = secs;
        }
        if self.verify_crc {
            config.session.verify_crc = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.init_config {
        let path = MultibootConfig::write_default_if_missing()
            .context("failed to write default config")?;
        println!("Config: {}", path.display());
    }
    let Some(rom) = args.rom.clone() else {
        return Ok(());
    };

    let mut config = MultibootConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MultibootConfig::default()
    });
    args.apply(&mut config);

    // Preconditions: nothing touches the link until the image is known good.
    let image = Image::load(&rom).with_context(|| format!("cannot send {}", rom.display()))?;
    describe(&rom, &image);

    let transport =
        SpiTransport::open(&config.device.path).context("link device unavailable")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, stopping at the next poll");
        let _ = shutdown_tx.send(());
    });

    let mut session = Session::new(
        transport,
        image,
        SessionOptions::from_config(&config.session),
    )
    .with_shutdown(Shutdown::new(shutdown_rx));

    let printer = if args.json {
        None
    } else {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        session = session.with_progress(progress_tx);
        Some(tokio::spawn(progress::render(progress_rx)))
    };

    let result = session.run().await;
    if let Some(printer) = printer {
        // The sender went away with the session.
        let _ = printer.await;
    }
    let report = result.context("multiboot failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn describe(path: &std::path::Path, image: &Image) {
    let header = image.header();
    tracing::info!(
        path = %path.display(),
        bytes = image.len(),
        entry = format_args!("{:#010x}", header.entry_branch()),
        title = %header.title(),
        game_code = %header.game_code(),
        maker_code = %header.maker_code(),
        blake3 = hex::encode(image.digest()),
        "image loaded"
    );
    for issue in header.check() {
        tracing::warn!(%issue, "cartridge header will likely be refused by the console");
    }
}

fn print_report(report: &SessionReport) {
    println!("═══════════════════════════════════════");
    println!("  Loading complete");
    println!("═══════════════════════════════════════");
    println!("  Image       : {} bytes ({} padded)", report.image_len, report.padded_len);
    println!("  Words sent  : {}", report.words_sent);
    println!("  CRC         : 0x{:04x}", report.crc);
    println!(
        "  Console CRC : 0x{:04x}{}",
        report.peer_crc,
        if report.crc_matched { "" } else { "  (mismatch)" }
    );
    println!("  Elapsed     : {:.1}s", report.elapsed_ms as f64 / 1000.0);
}
