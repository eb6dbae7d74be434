//! rgbpanel demo and test tool
//!
//! Drives an LED matrix with simple double-buffered test patterns.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use rgbpanel_hw::{
    available_pixel_mappers, parse_hex_color, Canvas, FrameBuffer, HardwareMapping,
    MatrixController, MultiplexKind, Rgb,
};
use std::os::raw::c_int;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::{Config, MatrixArgs};

static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Parser)]
#[command(name = "rgbpanel")]
#[command(about = "Demo and test tool for RGB LED matrix panels")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long, global = true)]
    frames: Option<u64>,

    #[command(flatten)]
    matrix: MatrixArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the matrix with a solid color
    Fill {
        /// Color in hex format (e.g., #FF0000 for red)
        color: Option<String>,
    },
    /// Pulse a solid color by cycling brightness
    Pulse {
        /// Color in hex format
        color: Option<String>,
    },
    /// Sweep a line across the matrix
    Sweep,
    /// Write the effective configuration to a TOML file
    Config {
        /// Output file path
        #[arg(default_value = "rgbpanel.toml")]
        output: PathBuf,
    },
    /// List hardware mappings, multiplexers and pixel mappers
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("info".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => Config::default(),
    };
    cli.matrix.apply(&mut config.matrix, &mut config.runtime);

    match cli.command {
        Commands::Config { output } => {
            config.save(&output)?;
            println!("Configuration written to: {}", output.display());
            Ok(())
        }
        Commands::List => {
            list();
            Ok(())
        }
        Commands::Fill { color } => {
            let color = parse_color(color.as_deref().unwrap_or(&config.demo.color))?;
            run(&config, cli.frames, |buffer, _| {
                buffer.fill(color.r, color.g, color.b);
            })
        }
        Commands::Pulse { color } => {
            let color = parse_color(color.as_deref().unwrap_or(&config.demo.color))?;
            run(&config, cli.frames, |buffer, frame| {
                // Triangle wave over 200 frames.
                let phase = (frame % 200) as u8;
                let level = if phase < 100 { phase + 1 } else { 200 - phase };
                buffer.set_brightness(level);
                buffer.fill(color.r, color.g, color.b);
            })
        }
        Commands::Sweep => run(&config, cli.frames, |buffer, frame| {
            let width = buffer.width() as u64;
            let x = (frame % width.max(1)) as i32;
            buffer.clear();
            let hue = (frame / width.max(1)) % 3;
            let color = match hue {
                0 => Rgb::new(255, 0, 0),
                1 => Rgb::new(0, 255, 0),
                _ => Rgb::new(0, 0, 255),
            };
            buffer.fill_rect(x, 0, 1, buffer.height() as u32, color);
        }),
    }
}

fn parse_color(hex: &str) -> Result<Rgb> {
    parse_hex_color(hex).with_context(|| format!("Invalid color '{}', expected #RRGGBB", hex))
}

/// Runs a double-buffered drawing loop until interrupted.
fn run<F>(config: &Config, frames: Option<u64>, mut draw: F) -> Result<()>
where
    F: FnMut(&mut FrameBuffer, u64),
{
    install_signal_handlers()?;

    let controller = MatrixController::create_from_config(config.matrix.clone(), &config.runtime)
        .context("Failed to initialize matrix")?;
    info!(
        "Running on {}x{} matrix, press Ctrl-C to stop",
        controller.width(),
        controller.height()
    );

    let fraction = config.demo.frame_rate_fraction;
    let mut offscreen = controller.create_offscreen_buffer()?;
    let mut frame: u64 = 0;
    while RUNNING.load(Ordering::SeqCst) && frames.map_or(true, |n| frame < n) {
        draw(&mut offscreen, frame);
        offscreen = controller.swap(offscreen, fraction)?;
        frame += 1;
    }

    debug!(
        "Showed {} frames in {} refresh cycles",
        frame,
        controller.refresh_count()
    );
    controller.close().context("Failed to shut down matrix")?;
    Ok(())
}

fn list() {
    println!("Hardware mappings:");
    for name in HardwareMapping::names() {
        let chains = HardwareMapping::find(name).map_or(0, |m| m.max_parallel_chains());
        println!("  {} ({} parallel chains)", name, chains);
    }
    println!("Multiplexing: 0=direct; {}", MultiplexKind::describe_all());
    println!("Pixel mappers: {}", available_pixel_mappers().join(", "));
}

extern "C" fn handle_signal(_signal: c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM to the drawing loop's stop flag.
fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // The handler only touches an atomic.
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("Failed to install {} handler", signal))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;

    #[test]
    fn test_sigterm_stops_loop() {
        install_signal_handlers().unwrap();
        RUNNING.store(true, Ordering::SeqCst);
        raise(Signal::SIGTERM).unwrap();
        assert!(!RUNNING.load(Ordering::SeqCst));
        RUNNING.store(true, Ordering::SeqCst);
    }
}
