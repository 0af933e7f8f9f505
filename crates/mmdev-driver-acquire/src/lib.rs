//! Dual-camera acquisition adapter.
//!
//! - `components`: frame source contract, ring records, simulated runtime
//! - `compositor`: pulls one frame per stream and lays them out per mode
//! - `camera`: the `AcquireCamera` device (properties, lifecycle, snap)
//! - `config` / `factory`: TOML settings and the registry entry

pub mod camera;
pub mod components;
pub mod compositor;
pub mod config;
pub mod factory;

pub use camera::AcquireCamera;
pub use compositor::{CancelToken, FrameCompositor, ImageMode, ReadOutcome, WaitPolicy};
pub use config::AcquireCameraConfig;
pub use factory::AcquireCameraFactory;
