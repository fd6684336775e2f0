//! Trigger-capture binary: drives the controller against the simulated device
//! or inspects the parameter nodes of a V4L2 camera.

use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use image::RgbaImage;
use parking_lot::Mutex;
use tracing::{info, warn};

use trigger_capture::sim::{SimDevice, SimProvider};
use trigger_capture::validation::validate_frame_sequence;
use trigger_capture::{
    Camera, CameraConfig, CaptureEvent, ChannelInterface, NodeMap, PixelFormat, SelectionPolicy,
    SignalLoop, V4l2NodeMap,
};

#[derive(Parser)]
#[command(name = "trigger-capture")]
#[command(about = "Software-triggered frame capture")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture pipeline against a simulated camera
    Simulate {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of frames to capture
        #[arg(short, long, default_value = "10")]
        frames: usize,

        /// Write the first captured frame to this PNG file
        #[arg(short, long)]
        save: Option<PathBuf>,

        /// Frame width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Device pixel format (e.g. Mono8, BayerRG8, YUV422_8)
        #[arg(long, default_value = "Mono8")]
        pixel_format: String,
    },

    /// List the parameter nodes of a V4L2 device
    Controls {
        /// Device index (/dev/videoN)
        #[arg(short, long, default_value = "0")]
        device: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=trigger_capture=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            config,
            frames,
            save,
            width,
            height,
            pixel_format,
        } => {
            let config = config.map_or_else(|| Ok(CameraConfig::default()), CameraConfig::load)?;
            let pixel_format: PixelFormat = pixel_format.parse()?;
            simulate(config, frames, save, (width, height), pixel_format)
        }
        Commands::Controls { device } => list_controls(device),
    }
}

fn simulate(
    config: CameraConfig,
    frame_count: usize,
    save: Option<PathBuf>,
    (width, height): (u32, u32),
    pixel_format: PixelFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let timeout = config.buffer_timeout() * 2;
    let mut provider = SimProvider::new(vec![SimDevice::builder()
        .resolution(width, height)
        .pixel_format(pixel_format)]);
    let (interface, events) = ChannelInterface::new();

    let mut camera = Camera::open(
        &mut provider,
        &SelectionPolicy::First,
        Box::new(interface),
        config,
    )?;
    let selector = camera.enable_software_trigger()?;
    info!(%selector, "software trigger enabled");
    camera.start()?;

    let camera = Arc::new(Mutex::new(camera));
    let signal_loop = SignalLoop::new(Arc::clone(&camera)).spawn()?;

    let started = Instant::now();
    let mut frames = Vec::with_capacity(frame_count);
    while frames.len() < frame_count {
        signal_loop.request_capture();
        match events.recv_timeout(timeout) {
            Ok(CaptureEvent::Frame(frame)) => {
                println!(
                    "Frame {}: {}x{} {} ({} bytes), timestamp: {:?}",
                    frame.frame_id,
                    frame.width,
                    frame.height,
                    frame.pixel_format,
                    frame.data.len(),
                    frame.timestamp
                );
                frames.push(frame);
            }
            Ok(CaptureEvent::Warning(message)) => warn!(%message, "capture warning"),
            Err(RecvTimeoutError::Timeout) => warn!("no event within {timeout:?}"),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    signal_loop.stop();
    camera.lock().stop()?;
    info!(
        frames = frames.len(),
        elapsed = ?started.elapsed(),
        "capture finished"
    );

    if let Err(err) = validate_frame_sequence(&frames) {
        warn!(error = %err, "frame sequence has gaps");
    }

    if let (Some(path), Some(frame)) = (save, frames.first()) {
        let rgba = frame
            .to_rgba8()
            .ok_or("captured frame format cannot be saved as PNG")?;
        let img = RgbaImage::from_raw(frame.width, frame.height, rgba)
            .ok_or("frame data does not match its dimensions")?;
        img.save_with_format(&path, image::ImageFormat::Png)?;
        println!("Saved frame {} to {}", frame.frame_id, path.display());
    }

    Ok(())
}

fn list_controls(index: usize) -> Result<(), Box<dyn std::error::Error>> {
    let node_map = V4l2NodeMap::open(index)?;
    let info = node_map.info();
    println!("Device: {}", info.model_name);
    println!("Driver: {}", info.interface);
    println!("Bus: {}", info.serial_number);

    for name in node_map.node_names() {
        if let Ok(entries) = node_map.list_entries(&name) {
            let current = node_map.current_entry(&name).unwrap_or_default();
            let symbols: Vec<&str> = entries.iter().map(|e| e.symbolic.as_str()).collect();
            println!("  {name} = {current} [{}]", symbols.join(", "));
        } else {
            match node_map.get(&name) {
                Ok(value) => println!("  {name} = {value}"),
                Err(err) => println!("  {name} ({err})"),
            }
        }
    }

    Ok(())
}
