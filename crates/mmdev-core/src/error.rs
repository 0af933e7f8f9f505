//! Error types shared by every device adapter.
//!
//! The host talks to adapters through integer status codes, while adapter code
//! itself works with typed errors. `DeviceError` is the typed side; every
//! variant maps onto a host code through [`DeviceError::code`], so a host shim
//! can translate a failed call without losing the category.
//!
//! ## Error Hierarchy
//!
//! - **Lifecycle**: `NotInitialized`, `RuntimeInit`
//! - **Properties**: `InvalidProperty`, `InvalidPropertyValue`, `PropertyReadOnly`,
//!   `DuplicateProperty`
//! - **Acquisition**: `ConfigureFailed`, `StartFailed`, `DeviceSelect`,
//!   `AcquisitionTimeout`, `AcquisitionCancelled`, `FrameTooLarge`,
//!   `BufferLayoutMismatch`
//! - **Driver**: `Driver` wraps a structured [`DriverError`] raised by an SDK shim
//! - **Configuration**: `Config` (file parsing) and `Configuration` (semantic checks)

use thiserror::Error;

/// Host status codes.
///
/// Values below 100 follow the host's generic device codes; adapter specific
/// codes live above 20000 so they never collide with vendor tables such as the
/// ASI range.
pub mod codes {
    /// Success.
    pub const DEVICE_OK: i32 = 0;
    /// Unspecified failure.
    pub const DEVICE_ERR: i32 = 1;
    /// Unknown property name.
    pub const DEVICE_INVALID_PROPERTY: i32 = 2;
    /// Value rejected by the property.
    pub const DEVICE_INVALID_PROPERTY_VALUE: i32 = 3;
    /// Property created twice.
    pub const DEVICE_DUPLICATE_PROPERTY: i32 = 4;
    /// Value has the wrong type.
    pub const DEVICE_INVALID_PROPERTY_TYPE: i32 = 5;
    /// Native module failed to load.
    pub const DEVICE_NATIVE_MODULE_FAILED: i32 = 6;
    /// Adapter state does not add up.
    pub const DEVICE_INTERNAL_INCONSISTENCY: i32 = 8;
    /// Operation not supported.
    pub const DEVICE_NOT_SUPPORTED: i32 = 9;
    /// Operation not implemented yet.
    pub const DEVICE_NOT_YET_IMPLEMENTED: i32 = 16;
    /// Channel index out of range.
    pub const DEVICE_NONEXISTENT_CHANNEL: i32 = 24;
    /// Frame does not fit the image buffer.
    pub const DEVICE_BUFFER_OVERFLOW: i32 = 25;
    /// Camera is in the middle of an acquisition.
    pub const DEVICE_CAMERA_BUSY_ACQUIRING: i32 = 27;

    /// Acquisition runtime could not be opened.
    pub const ERR_RUNTIME_INIT: i32 = 20001;
    /// Runtime rejected a configuration.
    pub const ERR_CONFIGURE_FAILED: i32 = 20002;
    /// Acquisition did not start.
    pub const ERR_START_FAILED: i32 = 20003;
    /// No device matched a selection pattern.
    pub const ERR_DEVICE_SELECT: i32 = 20004;
    /// No frame before the read deadline.
    pub const ERR_ACQUISITION_TIMEOUT: i32 = 20005;
    /// Acquisition aborted through the cancel handle.
    pub const ERR_ACQUISITION_CANCELLED: i32 = 20006;
    /// Call needs an initialized device.
    pub const ERR_NOT_INITIALIZED: i32 = 20007;
}

// =============================================================================
// Driver Errors
// =============================================================================

/// Coarse class of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Opening the runtime or device failed.
    Initialization,
    /// Settings were rejected.
    Configuration,
    /// Link to the device failed.
    Communication,
    /// Release failed.
    Shutdown,
    /// Device reported a fault.
    Hardware,
    /// Device did not answer in time.
    Timeout,
    /// Argument out of range or malformed.
    InvalidParameter,
    /// Call not valid in the current state, e.g. configure while running.
    InvalidState,
    /// Anything not covered above.
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::InvalidState => "invalid_state",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Structured error raised by an SDK shim (frame source, controller link).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Which driver raised it, e.g. `"acquire"`.
    pub driver_type: String,
    /// Failure class.
    pub kind: DriverErrorKind,
    /// Driver-provided detail.
    pub message: String,
}

impl DriverError {
    /// Error from `driver_type` of class `kind`.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the device error type.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Primary error type for device adapters.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// An operation that needs an initialized device ran before `initialize()`
    /// or after `shutdown()`.
    #[error("Device is not initialized")]
    NotInitialized,

    /// The vendor runtime (frame source, controller library) failed to start.
    ///
    /// **Recovery Strategy**: Abort initialize; the host may retry after the
    /// underlying runtime problem is fixed.
    #[error("Runtime initialization failed: {0}")]
    RuntimeInit(DriverError),

    /// The frame source rejected a configuration (bad device selection,
    /// unsupported settings, configure while running).
    #[error("Configure failed: {0}")]
    ConfigureFailed(DriverError),

    /// Starting the acquisition failed. Always reported, never fatal to the
    /// process.
    #[error("Acquisition start failed: {0}")]
    StartFailed(DriverError),

    /// No device of the requested kind matched a name pattern.
    #[error("Device selection failed for {kind} matching '{pattern}': {source}")]
    DeviceSelect {
        /// "camera" or "storage".
        kind: String,
        /// Regex that matched nothing.
        pattern: String,
        /// Error from the source's selection call.
        #[source]
        source: DriverError,
    },

    /// No frame became available on a stream within the configured bound.
    #[error("Acquisition timed out after {waited_ms} ms waiting on stream {stream}")]
    AcquisitionTimeout {
        /// Stream that stayed empty.
        stream: usize,
        /// Time spent waiting.
        waited_ms: u64,
    },

    /// The wait for a frame was cancelled through the cancellation handle.
    #[error("Acquisition cancelled while waiting on stream {stream}")]
    AcquisitionCancelled {
        /// Stream being waited on.
        stream: usize,
    },

    /// A frame payload does not fit the destination image region.
    #[error("Frame payload of {bytes} bytes on stream {stream} exceeds destination of {capacity} bytes")]
    FrameTooLarge {
        /// Stream the frame came from.
        stream: usize,
        /// Payload size.
        bytes: usize,
        /// Destination size.
        capacity: usize,
    },

    /// Buffer count or geometry does not match the current image mode.
    #[error("Image buffers inconsistent with mode '{mode}': expected {expected} buffer(s), found {found}")]
    BufferLayoutMismatch {
        /// Current mode.
        mode: String,
        /// Buffers the mode needs.
        expected: usize,
        /// Buffers present.
        found: usize,
    },

    /// Requested channel does not exist.
    #[error("Channel {0} does not exist")]
    NonexistentChannel(usize),

    /// Property is not registered on the device.
    #[error("Unknown property '{0}'")]
    InvalidProperty(String),

    /// Value is not legal for the property (not in allowed set, wrong type).
    #[error("Invalid value '{value}' for property '{name}'")]
    InvalidPropertyValue {
        /// Property name.
        name: String,
        /// Rejected value.
        value: String,
    },

    /// Attempted to modify a read-only property.
    #[error("Property '{0}' is read-only")]
    PropertyReadOnly(String),

    /// A property with this name already exists.
    #[error("Property '{0}' already exists")]
    DuplicateProperty(String),

    /// Operation not supported by this device.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Structured driver error with category.
    #[error("{0}")]
    Driver(#[from] DriverError),

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for DeviceError {
    fn from(err: figment::Error) -> Self {
        DeviceError::Config(Box::new(err))
    }
}

impl DeviceError {
    /// Host status code for this error.
    pub fn code(&self) -> i32 {
        use codes::*;
        match self {
            DeviceError::NotInitialized => ERR_NOT_INITIALIZED,
            DeviceError::RuntimeInit(_) => ERR_RUNTIME_INIT,
            DeviceError::ConfigureFailed(_) => ERR_CONFIGURE_FAILED,
            DeviceError::StartFailed(_) => ERR_START_FAILED,
            DeviceError::DeviceSelect { .. } => ERR_DEVICE_SELECT,
            DeviceError::AcquisitionTimeout { .. } => ERR_ACQUISITION_TIMEOUT,
            DeviceError::AcquisitionCancelled { .. } => ERR_ACQUISITION_CANCELLED,
            DeviceError::FrameTooLarge { .. } => DEVICE_BUFFER_OVERFLOW,
            DeviceError::BufferLayoutMismatch { .. } => DEVICE_INTERNAL_INCONSISTENCY,
            DeviceError::NonexistentChannel(_) => DEVICE_NONEXISTENT_CHANNEL,
            DeviceError::InvalidProperty(_) => DEVICE_INVALID_PROPERTY,
            DeviceError::InvalidPropertyValue { .. } => DEVICE_INVALID_PROPERTY_VALUE,
            DeviceError::PropertyReadOnly(_) => DEVICE_INVALID_PROPERTY_VALUE,
            DeviceError::DuplicateProperty(_) => DEVICE_DUPLICATE_PROPERTY,
            DeviceError::NotSupported(_) => DEVICE_NOT_SUPPORTED,
            DeviceError::Driver(_) => DEVICE_ERR,
            DeviceError::Config(_) | DeviceError::Configuration(_) => DEVICE_ERR,
        }
    }
}
