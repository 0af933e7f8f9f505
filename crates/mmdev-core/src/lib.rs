//! Core contracts for mmdev device adapters.
//!
//! - [`capabilities`]: the `Device` and `Camera` traits the host calls
//! - [`device`]: composable pieces every device holds (error catalog, name,
//!   lifecycle, properties)
//! - [`property`]: string properties with type, allowed values and limits
//! - [`image`]: the adapter-owned pixel container
//! - [`module`]: device factories and the create-by-name registry
//! - [`config`] and [`logging`]: startup configuration and tracing setup
//! - [`error`]: `DeviceError`, `DriverError` and the host status codes

pub mod capabilities;
pub mod config;
pub mod device;
pub mod error;
pub mod image;
pub mod logging;
pub mod module;
pub mod property;

pub use capabilities::{Camera, Device, DeviceType, Roi};
pub use error::{codes, DeviceError, DeviceResult, DriverError, DriverErrorKind};
pub use image::ImageBuffer;
