//! `mmdev`: drive adapters without a host application.
//!
//! ```bash
//! mmdev list
//! mmdev snap --mode single --count 3 --output frames/snap
//! mmdev props --device camera
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mmdev_core::config::{AdapterConfig, DeviceDefinition, DEFAULT_CONFIG_PATH};
use mmdev_core::logging;
use mmdev_core::module::ModuleRegistry;
use mmdev_core::Camera;
use mmdev_driver_acquire::camera::{DEVICE_NAME as ACQUIRE_CAMERA, PROP_MODE};
use mmdev_driver_acquire::{AcquireCameraFactory, ImageMode};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "mmdev")]
#[command(about = "Device adapters for a microscopy control host", long_about = None)]
struct Cli {
    /// Adapter configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered device types and configured devices
    List,

    /// Acquire images from a camera
    Snap {
        /// Device label from the configuration; the first enabled camera when omitted
        #[arg(long)]
        device: Option<String>,

        #[arg(long, value_enum, default_value_t = ModeArg::Multi)]
        mode: ModeArg,

        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Exposure in milliseconds
        #[arg(long)]
        exposure: Option<f64>,

        /// Write raw pixels to `<output>-<snap>-<channel>.raw`
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print a device's properties after initialize
    Props {
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Multi,
    Single,
}

impl From<ModeArg> for ImageMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Multi => ImageMode::Multi,
            ModeArg::Single => ImageMode::Single,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AdapterConfig::load_from(&cli.config)
        .map_err(|e| anyhow!("Failed to load {}: {}", cli.config.display(), e))?;
    config.validate().map_err(|e| anyhow!(e))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    let mut registry = ModuleRegistry::new();
    registry.register(AcquireCameraFactory)?;

    match cli.command {
        Commands::List => list(&registry, &config),
        Commands::Snap {
            device,
            mode,
            count,
            exposure,
            output,
        } => {
            snap(
                &registry,
                &config,
                device.as_deref(),
                mode.into(),
                count,
                exposure,
                output.as_deref(),
            )
            .await
        }
        Commands::Props { device } => props(&registry, &config, device.as_deref()).await,
    }
}

fn list(registry: &ModuleRegistry, config: &AdapterConfig) -> Result<()> {
    println!("Device types:");
    for info in registry.list() {
        println!(
            "  {:<16} {:<8} {}",
            info.name,
            info.device_type.to_string(),
            info.description
        );
    }

    println!("Configured devices:");
    if config.devices.is_empty() {
        println!("  (none)");
    }
    for device in &config.devices {
        let state = if device.enabled { "" } else { " (disabled)" };
        println!("  {:<16} {}{}", device.label, device.driver, state);
    }
    Ok(())
}

/// The named device, else the first enabled camera, else a default camera.
fn pick_definition(config: &AdapterConfig, label: Option<&str>) -> Result<DeviceDefinition> {
    if let Some(label) = label {
        return config
            .enabled_devices()
            .find(|d| d.label == label)
            .cloned()
            .ok_or_else(|| anyhow!("No enabled device labelled '{}'", label));
    }

    Ok(config
        .enabled_devices()
        .find(|d| d.driver == ACQUIRE_CAMERA)
        .cloned()
        .unwrap_or_else(|| DeviceDefinition {
            label: "camera".to_string(),
            driver: ACQUIRE_CAMERA.to_string(),
            enabled: true,
            config: toml::Value::Table(toml::map::Map::new()),
        }))
}

async fn open_camera(
    registry: &ModuleRegistry,
    config: &AdapterConfig,
    label: Option<&str>,
) -> Result<Box<dyn Camera>> {
    let definition = pick_definition(config, label)?;
    let instance = registry.create_from_definition(&definition).await?;
    let mut camera = instance
        .into_camera()
        .ok_or_else(|| anyhow!("Device '{}' is not a camera", definition.label))?;
    camera
        .initialize()
        .with_context(|| format!("Failed to initialize '{}'", definition.label))?;
    info!(device = %definition.label, "Camera ready");
    Ok(camera)
}

async fn snap(
    registry: &ModuleRegistry,
    config: &AdapterConfig,
    label: Option<&str>,
    mode: ImageMode,
    count: usize,
    exposure: Option<f64>,
    output: Option<&Path>,
) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }

    let mut camera = open_camera(registry, config, label).await?;
    camera.set_property(PROP_MODE, mode.as_str())?;
    if let Some(ms) = exposure {
        camera.set_exposure(ms)?;
    }

    for index in 0..count {
        tokio::select! {
            result = camera.snap_image() => result?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted");
                break;
            }
        }

        for channel in 0..camera.number_of_channels() {
            let image = camera.image_buffer_for(channel)?;
            println!(
                "snap {} {:<9} {}x{}x{} mean {:.2}",
                index,
                camera.channel_name(channel)?,
                image.width(),
                image.height(),
                image.depth(),
                image.mean()
            );

            if let Some(prefix) = output {
                let path = raw_path(prefix, index, channel);
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, image.pixels())
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
    }

    camera.shutdown()?;
    Ok(())
}

fn raw_path(prefix: &Path, snap: usize, channel: usize) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!("-{}-{}.raw", snap, channel));
    PathBuf::from(name)
}

async fn props(registry: &ModuleRegistry, config: &AdapterConfig, label: Option<&str>) -> Result<()> {
    let mut camera = open_camera(registry, config, label).await?;
    println!("{}", serde_json::to_string_pretty(&camera.properties().to_json())?);
    camera.shutdown()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_path_appends_suffix() {
        assert_eq!(
            raw_path(Path::new("out/snap"), 2, 1),
            PathBuf::from("out/snap-2-1.raw")
        );
    }

    #[test]
    fn test_pick_definition_defaults_to_camera() {
        let config = AdapterConfig::default();
        let definition = pick_definition(&config, None).unwrap();
        assert_eq!(definition.driver, ACQUIRE_CAMERA);
        assert!(pick_definition(&config, Some("missing")).is_err());
    }
}
