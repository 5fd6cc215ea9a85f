use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serboot_core::boot::{BootOutcome, startup};
use serboot_core::channel::{SerialChannel, open_port};
use serboot_core::loader::{HexFile, HexRegion, Loader, LoaderConfig, UpdatePlan, config_from_regions, simulate};
use serboot_core::notify::TracingSink;
use serboot_core::{Bootloader, DeviceLayout, SimulatedFlash};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serial PIC18 bootloader tool", long_about = None)]
struct Cli {
    /// Device layout TOML (defaults to PIC18F4550)
    #[arg(long, global = true)]
    layout: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Program a device over a serial port
    Flash {
        /// Firmware image (Intel HEX)
        hex: PathBuf,

        /// Serial port, e.g. /dev/ttyUSB0 or COM3
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Loader settings TOML
        #[arg(long)]
        config: Option<PathBuf>,

        /// Send the image's configuration bytes with Finish
        #[arg(long)]
        config_from_hex: bool,
    },
    /// Print the frame plan for an image
    Plan {
        hex: PathBuf,

        #[arg(long)]
        config_from_hex: bool,
    },
    /// Run an image through an emulated device
    Simulate {
        hex: PathBuf,

        /// Initial flash contents (raw binary)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Save the resulting flash contents
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        config_from_hex: bool,
    },
    /// Act as the device on a serial port
    Emulate {
        #[arg(short, long)]
        port: String,

        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,

        #[arg(long)]
        image: Option<PathBuf>,

        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let layout = match &cli.layout {
        Some(path) => DeviceLayout::load_from_file(path)
            .with_context(|| format!("Loading layout {}", path.display()))?,
        None => DeviceLayout::default(),
    };

    match cli.command {
        Commands::Flash {
            hex,
            port,
            baud,
            config,
            config_from_hex,
        } => {
            let mut settings = match config {
                Some(path) => LoaderConfig::load_from_file(&path)
                    .with_context(|| format!("Loading loader config {}", path.display()))?,
                None => LoaderConfig::default(),
            };
            if port.is_some() {
                settings.port = port;
            }
            if let Some(baud) = baud {
                settings.baud = baud;
            }
            settings.config_from_hex |= config_from_hex;
            flash(&hex, &layout, settings)
        }
        Commands::Plan {
            hex,
            config_from_hex,
        } => {
            let plan = build_plan(&hex, &layout, &[], config_from_hex)?;
            println!("{}", plan);
            Ok(())
        }
        Commands::Simulate {
            hex,
            image,
            out,
            config_from_hex,
        } => {
            let plan = build_plan(&hex, &layout, &[], config_from_hex)?;
            let initial = initial_flash(image.as_deref(), &layout)?;
            let report = simulate(&plan, &layout, initial)?;
            info!(
                frames = report.load.frames,
                wire_bytes = report.load.wire_bytes,
                vector_restored = report.finish.vector_restored,
                config_bytes = report.finish.config_written,
                "Simulation complete"
            );
            if report.unread > 0 {
                warn!(unread = report.unread, "Device stopped before the end of the stream");
            }
            if let Some(out) = out {
                report.flash.save_image(&out)?;
                info!(path = %out.display(), "Flash image saved");
            }
            Ok(())
        }
        Commands::Emulate {
            port,
            baud,
            image,
            out,
        } => emulate(&port, baud, image.as_deref(), out.as_deref(), &layout),
    }
}

fn load_regions(hex: &Path) -> Result<Vec<HexRegion>> {
    info!(path = %hex.display(), "Loading firmware");
    let file = HexFile::load(hex).with_context(|| format!("Reading {}", hex.display()))?;
    Ok(file.regions()?)
}

fn build_plan(
    hex: &Path,
    layout: &DeviceLayout,
    config_bytes: &[u8],
    config_from_hex: bool,
) -> Result<UpdatePlan> {
    let regions = load_regions(hex)?;
    let config = if config_from_hex {
        config_from_regions(&regions, layout)
    } else {
        config_bytes.to_vec()
    };
    Ok(UpdatePlan::build(&regions, layout, config)?)
}

fn initial_flash(image: Option<&Path>, layout: &DeviceLayout) -> Result<SimulatedFlash> {
    match image {
        Some(path) => SimulatedFlash::load_image(path, layout),
        None => Ok(SimulatedFlash::new(layout)),
    }
}

fn flash(hex: &Path, layout: &DeviceLayout, settings: LoaderConfig) -> Result<()> {
    let Some(port_name) = settings.port.clone() else {
        bail!("No serial port given (use --port or set `port` in the loader config)");
    };
    let plan = build_plan(hex, layout, &settings.config_bytes, settings.config_from_hex)?;
    info!(
        erase_blocks = plan.blocks_erased(),
        write_bytes = plan.bytes_written(),
        config_bytes = plan.config.len(),
        "Update planned"
    );

    let port = open_port(&port_name, settings.baud)?;
    info!("Sending sync preamble, reset the device now");
    let mut loader = Loader::new(port, settings);
    let summary = loader.send_plan(&plan)?;
    info!(
        frames = summary.frames,
        wire_bytes = summary.wire_bytes,
        "Device programmed"
    );
    Ok(())
}

fn emulate(
    port: &str,
    baud: u32,
    image: Option<&Path>,
    out: Option<&Path>,
    layout: &DeviceLayout,
) -> Result<()> {
    let channel = SerialChannel::open(port, baud)?;
    let flash = initial_flash(image, layout)?;
    let mut device = Bootloader::new(channel, flash, TracingSink, layout.clone());

    info!(port, "Emulated device waiting for a host");
    let outcome = startup(&mut device, true)?;
    if let BootOutcome::Updated(report) = outcome {
        info!(
            vector_restored = report.vector_restored,
            config_bytes = report.config_written,
            "Update received"
        );
    }
    if let Some(out) = out {
        device.flash().save_image(out)?;
        info!(path = %out.display(), "Flash image saved");
    }
    Ok(())
}
