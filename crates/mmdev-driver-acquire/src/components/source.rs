//! Frame source contract and its configuration types.
//!
//! A frame source is the vendor runtime behind the adapter: it owns the
//! cameras, the storage sinks and one ring per video stream. The adapter
//! never touches ring memory directly; it maps the ready span, copies what it
//! needs and hands the bytes back with `unmap_read`.

use async_trait::async_trait;
use mmdev_core::DriverError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::frame::{MappedRegion, SampleType};

/// Driver name carried by every [`DriverError`] from this crate.
pub const DRIVER_TYPE: &str = "acquire";

/// Number of video streams a source exposes.
pub const MAX_VIDEO_STREAMS: usize = 2;

/// Index of one hardware video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub usize);

impl StreamId {
    /// Position in the stream array.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a device identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Camera producing frames.
    Camera,
    /// Sink the frames of a stream would be written to.
    Storage,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Camera => write!(f, "camera"),
            DeviceKind::Storage => write!(f, "storage"),
        }
    }
}

/// A device known to the source, as returned by selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    /// Camera or storage.
    pub kind: DeviceKind,
    /// Index within its kind.
    pub id: u8,
    /// Name the source lists the device under.
    pub name: String,
}

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageShape {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageShape {
    /// Shape of `width x height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `width * height`.
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Per-camera acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Exposure in microseconds.
    pub exposure_time_us: f32,
    /// Binning factor.
    pub binning: u8,
    /// Pixel encoding of produced frames.
    pub pixel_type: SampleType,
    /// Frame size.
    pub shape: ImageShape,
    /// Line interval in microseconds.
    pub line_interval_us: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            exposure_time_us: 10_000.0,
            binning: 1,
            pixel_type: SampleType::U8,
            shape: ImageShape::new(640, 480),
            line_interval_us: 10.0,
        }
    }
}

/// Camera binding of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraProperties {
    /// Bound camera; `None` leaves the stream idle.
    pub identifier: Option<DeviceIdentifier>,
    /// Camera settings.
    pub settings: CameraSettings,
}

/// Storage binding of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageProperties {
    /// Bound sink; `None` leaves frames unstored.
    pub identifier: Option<DeviceIdentifier>,
    /// Output file for sinks that write one.
    #[serde(default)]
    pub filename: Option<String>,
}

/// Bindings and limits of one video stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoStreamProperties {
    /// Camera side.
    pub camera: CameraProperties,
    /// Storage side.
    pub storage: StorageProperties,
    /// Frames to produce before the stream stops on its own; 0 is unbounded.
    pub max_frame_count: u64,
}

/// Complete runtime configuration, one entry per stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionProperties {
    /// Stream 0 first.
    pub video: [VideoStreamProperties; MAX_VIDEO_STREAMS],
}

/// A runtime log line before formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Logged as an error rather than a debug line.
    pub is_error: bool,
    /// Source file of the call site.
    pub file: String,
    /// Line number of the call site.
    pub line: u32,
    /// Runtime function that logged.
    pub function: String,
    /// Formatted message.
    pub message: String,
}

impl LogRecord {
    /// `[ERROR ]file(line) - function: message`
    pub fn to_host_line(&self) -> String {
        format!(
            "{}{}({}) - {}: {}",
            if self.is_error { "ERROR " } else { "" },
            self.file,
            self.line,
            self.function,
            self.message
        )
    }
}

/// Log sink handed to a source when it is created.
pub type Reporter = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Opens a frame source; swapped out in tests to simulate missing runtimes.
pub type SourceConnector =
    Arc<dyn Fn(Reporter) -> Result<Arc<dyn FrameSource>, DriverError> + Send + Sync>;

/// Multi-stream video producer.
///
/// All calls take `&self`; implementations keep their state behind locks so
/// the producer side can run concurrently with the consumer.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Devices of every kind the source can bind.
    fn devices(&self) -> Vec<DeviceIdentifier>;

    /// First device of `kind` whose name matches the regex `pattern`.
    fn select_device(&self, kind: DeviceKind, pattern: &str) -> Result<DeviceIdentifier, DriverError>;

    /// Current configuration, including device bindings.
    fn get_configuration(&self) -> Result<AcquisitionProperties, DriverError>;

    /// Apply a configuration. The accepted (possibly normalized) values are
    /// written back into `properties`.
    fn configure(&self, properties: &mut AcquisitionProperties) -> Result<(), DriverError>;

    /// Start every stream that has a camera bound.
    fn start(&self) -> Result<(), DriverError>;

    /// Stop all streams. Stopping an idle source is not an error.
    fn stop(&self) -> Result<(), DriverError>;

    /// Span of frames ready on `stream`. Empty when nothing has arrived.
    fn map_read(&self, stream: StreamId) -> Result<MappedRegion, DriverError>;

    /// Release `consumed` bytes from the front of the last mapped span.
    fn unmap_read(&self, stream: StreamId, consumed: usize) -> Result<(), DriverError>;

    /// Suspend until data may be available on `stream` or `max_wait` passes.
    /// Sources without arrival notification just sleep.
    async fn wait_for_data(&self, stream: StreamId, max_wait: Duration) {
        let _ = stream;
        tokio::time::sleep(max_wait).await;
    }

    /// Stop and release the source. Later calls fail.
    fn shutdown(&self) -> Result<(), DriverError>;
}
