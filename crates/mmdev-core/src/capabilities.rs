//! Device contracts called by the host.
//!
//! The host drives every adapter through a small fixed surface: lifecycle,
//! string properties and error texts ([`Device`]), plus the camera specific
//! accessors and the single-shot acquisition ([`Camera`]).
//!
//! Calls arrive sequentially. Acquisition is the only suspending operation, so
//! [`Camera::snap_image`] is async and takes `&mut self`; a second snap on the
//! same instance cannot start while the first one is in flight.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn snap_and_measure<C: Camera>(camera: &mut C) -> DeviceResult<Vec<f64>> {
//!     camera.set_exposure(5.0)?;
//!     camera.snap_image().await?;
//!     (0..camera.number_of_channels())
//!         .map(|ch| camera.image_buffer_for(ch).map(|b| b.mean()))
//!         .collect()
//! }
//! ```

use crate::error::{DeviceError, DeviceResult};
use crate::image::ImageBuffer;
use crate::property::PropertyMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Host-facing device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Image source.
    Camera,
    /// Positioner.
    Stage,
    /// Owns a shared link and enumerates peripherals.
    Hub,
    /// Anything else.
    Generic,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceType::Camera => "camera",
            DeviceType::Stage => "stage",
            DeviceType::Hub => "hub",
            DeviceType::Generic => "generic",
        };
        write!(f, "{}", label)
    }
}

/// Region of interest in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Lifecycle, properties and error texts common to every device.
pub trait Device: Send {
    /// Device name as registered with the host.
    fn name(&self) -> &str;

    /// Category reported to the host.
    fn device_type(&self) -> DeviceType;

    /// Whether an operation is still in progress.
    fn busy(&self) -> bool;

    /// Human-readable text for a status code, if the device knows it.
    fn error_text(&self, code: i32) -> Option<String>;

    /// All properties the device exposes.
    fn properties(&self) -> &PropertyMap;

    /// Current value of `name`, as text.
    fn get_property(&self, name: &str) -> DeviceResult<String> {
        self.properties().get(name).map(str::to_string)
    }

    /// Validate and apply a host write.
    fn set_property(&mut self, name: &str, value: &str) -> DeviceResult<()>;

    /// Repeated calls after a successful initialize are no-ops.
    fn initialize(&mut self) -> DeviceResult<()>;

    /// Release hardware resources. Safe to call when not initialized.
    fn shutdown(&mut self) -> DeviceResult<()>;

    /// Whether `initialize` has succeeded since the last shutdown.
    fn is_initialized(&self) -> bool;
}

/// Camera surface: acquisition plus image geometry accessors.
#[async_trait]
pub trait Camera: Device {
    /// Acquire one image (one frame per stream) into the internal buffers.
    async fn snap_image(&mut self) -> DeviceResult<()>;

    /// Channel 0 image.
    fn image_buffer(&self) -> DeviceResult<&ImageBuffer> {
        self.image_buffer_for(0)
    }

    /// Image for `channel`; fails past `number_of_channels()`.
    fn image_buffer_for(&self, channel: usize) -> DeviceResult<&ImageBuffer>;

    /// Images one snap produces.
    fn number_of_channels(&self) -> usize;

    /// Colour components per pixel.
    fn number_of_components(&self) -> usize {
        1
    }

    /// Host-visible name of `channel`.
    fn channel_name(&self, channel: usize) -> DeviceResult<String>;

    /// Width of each image in pixels.
    fn image_width(&self) -> u32;

    /// Height of each image in pixels.
    fn image_height(&self) -> u32;

    /// Bytes per pixel.
    fn image_bytes_per_pixel(&self) -> u32;

    /// Significant bits per pixel.
    fn bit_depth(&self) -> u32 {
        self.image_bytes_per_pixel() * 8
    }

    /// Bytes per image.
    fn image_buffer_size(&self) -> usize {
        self.image_width() as usize * self.image_height() as usize * self.image_bytes_per_pixel() as usize
    }

    /// Exposure in milliseconds.
    fn exposure(&self) -> DeviceResult<f64>;

    /// Set exposure in milliseconds.
    fn set_exposure(&mut self, exposure_ms: f64) -> DeviceResult<()>;

    /// Current binning factor.
    fn binning(&self) -> u32 {
        1
    }

    /// Only 1 is supported by default.
    fn set_binning(&mut self, binning: u32) -> DeviceResult<()> {
        if binning == 1 {
            Ok(())
        } else {
            Err(DeviceError::InvalidPropertyValue {
                name: "Binning".to_string(),
                value: binning.to_string(),
            })
        }
    }

    /// Current region of interest; the full frame by default.
    fn roi(&self) -> Roi {
        Roi {
            x: 0,
            y: 0,
            width: self.image_width(),
            height: self.image_height(),
        }
    }

    /// Restrict readout to `roi`.
    fn set_roi(&mut self, roi: Roi) -> DeviceResult<()>;

    /// Back to the full frame.
    fn clear_roi(&mut self) -> DeviceResult<()>;

    /// Whether exposures can be loaded as a hardware sequence.
    fn is_exposure_sequenceable(&self) -> bool {
        false
    }
}
