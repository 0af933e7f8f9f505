//! Dual-stream camera device.
//!
//! Binds two simulated cameras (one per stream) and two storage sinks,
//! acquires one frame from each stream per snap and exposes the result either
//! as two images ("Multi") or as one image with the streams stacked
//! vertically ("Single").

use async_trait::async_trait;
use mmdev_core::capabilities::{Camera, Device, DeviceType, Roi};
use mmdev_core::device::DeviceBase;
use mmdev_core::property::{format_float, Property, PropertyMap};
use mmdev_core::{codes, DeviceError, DeviceResult, ImageBuffer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::compositor::{
    allocate_images, check_layout, CancelToken, FrameCompositor, ImageMode, MODE_MULTI, MODE_SINGLE,
};
use crate::components::frame::SampleType;
use crate::components::simulated::{simulated_connector, SimulatedConfig};
use crate::components::source::{
    AcquisitionProperties, DeviceIdentifier, DeviceKind, FrameSource, ImageShape, LogRecord,
    Reporter, SourceConnector,
};
use crate::config::AcquireCameraConfig;

/// Registry name.
pub const DEVICE_NAME: &str = "AcquireCamera";
/// Value of the `Description` property.
pub const DEVICE_DESCRIPTION: &str = "Records simultaneously from two Hamamatsu cameras";
/// Value of the `CameraID` property.
pub const CAMERA_ID: &str = "V1.0";

/// Read-only device name property.
pub const PROP_CAMERA_NAME: &str = "CameraName";
/// Read-only camera identifier property.
pub const PROP_CAMERA_ID: &str = "CameraID";
/// Pre-init: 1 uses fixed demo geometry, 0 reads it from the source.
pub const PROP_DEMO: &str = "Demo";
/// Binning; fixed at 1.
pub const PROP_BINNING: &str = "Binning";
/// "Multi" or "Single", see [`ImageMode`].
pub const PROP_MODE: &str = "Mode";
/// Line interval of both cameras in microseconds.
pub const PROP_LINE_INTERVAL: &str = "LineIntervalUs";
/// Exposure of both cameras in milliseconds.
pub const PROP_EXPOSURE: &str = "Exposure";

/// Longest exposure the `Exposure` property accepts: one hour.
pub const MAX_EXPOSURE_MS: f64 = 3_600_000.0;

const CHANNEL_NAMES: [&str; 2] = ["Camera-1", "Camera-2"];

/// Reporter that forwards runtime log lines into `tracing`.
pub fn tracing_reporter(device: &'static str) -> Reporter {
    Arc::new(move |record: &LogRecord| {
        let line = record.to_host_line();
        if record.is_error {
            error!(device, "{}", line);
        } else {
            debug!(device, "{}", line);
        }
    })
}

/// Camera recording two streams at once, exposed as two channels or one stacked image.
pub struct AcquireCamera {
    base: DeviceBase,
    config: AcquireCameraConfig,
    connector: SourceConnector,
    source: Option<Arc<dyn FrameSource>>,
    cancel: CancelToken,
    mode: ImageMode,
    demo: bool,
    images: Vec<ImageBuffer>,
}

/// Stops a started source on drop unless `stop` already ran.
struct StopGuard {
    source: Option<Arc<dyn FrameSource>>,
}

impl StopGuard {
    fn new(source: Arc<dyn FrameSource>) -> Self {
        Self { source: Some(source) }
    }

    /// Stop now and hand back the result.
    fn stop(mut self) -> DeviceResult<()> {
        match self.source.take() {
            Some(source) => stop_source(source.as_ref()),
            None => Ok(()),
        }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            debug!(device = DEVICE_NAME, "Snap abandoned, stopping acquisition");
            let _ = stop_source(source.as_ref());
        }
    }
}

fn stop_source(source: &dyn FrameSource) -> DeviceResult<()> {
    source.stop().map_err(|e| {
        warn!(device = DEVICE_NAME, error = %e, "Stop failed");
        DeviceError::Driver(e)
    })
}

impl AcquireCamera {
    /// Camera on the simulated runtime with default settings.
    pub fn new() -> DeviceResult<Self> {
        Self::with_config(AcquireCameraConfig::default())
    }

    /// Camera backed by the simulated runtime.
    pub fn with_config(config: AcquireCameraConfig) -> DeviceResult<Self> {
        let connector = simulated_connector(SimulatedConfig {
            seed: config.seed,
            ring_frames: config.ring_frames,
        });
        Self::with_connector(config, connector)
    }

    /// Camera whose source comes from `connector` at initialize.
    pub fn with_connector(config: AcquireCameraConfig, connector: SourceConnector) -> DeviceResult<Self> {
        let mut base = DeviceBase::new(DEVICE_NAME)?.with_description(DEVICE_DESCRIPTION)?;
        for (code, text) in [
            (codes::ERR_RUNTIME_INIT, "Acquisition runtime failed to initialize"),
            (codes::ERR_CONFIGURE_FAILED, "Acquisition runtime rejected the configuration"),
            (codes::ERR_START_FAILED, "Acquisition failed to start"),
            (codes::ERR_DEVICE_SELECT, "No camera or storage device matches the requested name"),
            (codes::ERR_ACQUISITION_TIMEOUT, "Timed out waiting for a frame"),
            (codes::ERR_ACQUISITION_CANCELLED, "Acquisition was cancelled"),
        ] {
            base.errors.set(code, text);
        }

        base.properties
            .create(Property::string(PROP_CAMERA_NAME, DEVICE_NAME).read_only())?;
        base.properties
            .create(Property::string(PROP_CAMERA_ID, CAMERA_ID).read_only())?;
        base.properties.create(
            Property::integer(PROP_DEMO, i64::from(config.demo))
                .with_allowed_values(["0", "1"])
                .pre_init(),
        )?;

        Ok(Self {
            base,
            demo: config.demo,
            config,
            connector,
            source: None,
            cancel: CancelToken::new(),
            mode: ImageMode::Multi,
            images: Vec::new(),
        })
    }

    /// Current output layout.
    pub fn mode(&self) -> ImageMode {
        self.mode
    }

    /// Current output images, one per channel.
    pub fn images(&self) -> &[ImageBuffer] {
        &self.images
    }

    /// Handle that aborts the acquisition in flight.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Source opened at initialize.
    pub fn source(&self) -> DeviceResult<&Arc<dyn FrameSource>> {
        self.source.as_ref().ok_or(DeviceError::NotInitialized)
    }

    /// Switch layout and reallocate the images.
    ///
    /// Mode, `Mode` property and buffers change together or not at all.
    pub fn set_mode(&mut self, mode: ImageMode) -> DeviceResult<()> {
        self.base.lifecycle.ensure_initialized()?;
        let images = self.buffers_for(mode)?;
        self.base.properties.update(PROP_MODE, mode.as_str())?;
        self.mode = mode;
        self.images = images;
        Ok(())
    }

    /// Per-stream frame geometry and depth for the current settings.
    fn frame_geometry(&self) -> DeviceResult<(u32, u32, u32)> {
        if self.demo {
            return Ok((self.config.width, self.config.height, self.config.bytes_per_pixel));
        }
        let props = self.source()?.get_configuration()?;
        let settings = &props.video[0].camera.settings;
        Ok((
            settings.shape.width,
            settings.shape.height,
            settings.pixel_type.bytes_per_pixel() as u32,
        ))
    }

    fn buffers_for(&self, mode: ImageMode) -> DeviceResult<Vec<ImageBuffer>> {
        let (width, height, depth) = self.frame_geometry()?;
        let images = allocate_images(mode, width, height, depth);
        debug!(
            device = DEVICE_NAME,
            mode = %mode,
            images = images.len(),
            width,
            height,
            depth,
            "Image buffers allocated"
        );
        Ok(images)
    }

    fn setup_buffers(&mut self) -> DeviceResult<()> {
        self.images = self.buffers_for(self.mode)?;
        Ok(())
    }

    fn select(source: &dyn FrameSource, kind: DeviceKind, pattern: &str) -> DeviceResult<DeviceIdentifier> {
        source
            .select_device(kind, pattern)
            .map_err(|e| DeviceError::DeviceSelect {
                kind: kind.to_string(),
                pattern: pattern.to_string(),
                source: e,
            })
    }

    /// Bind camera `i` and the storage sink to stream `i`.
    fn bind_devices(&self, source: &dyn FrameSource, props: &mut AcquisitionProperties) -> DeviceResult<()> {
        for (index, video) in props.video.iter_mut().enumerate() {
            let pattern = self.config.camera_patterns.get(index).ok_or_else(|| {
                DeviceError::Configuration(format!("no camera pattern for stream {}", index))
            })?;
            video.camera.identifier = Some(Self::select(source, DeviceKind::Camera, pattern)?);
            video.storage.identifier = Some(Self::select(
                source,
                DeviceKind::Storage,
                &self.config.storage_pattern,
            )?);
        }
        Ok(())
    }

    /// Bind devices on a freshly connected source and apply its configuration.
    fn prepare_source(&self, source: &dyn FrameSource) -> DeviceResult<AcquisitionProperties> {
        let mut props = source.get_configuration()?;
        self.bind_devices(source, &mut props)?;
        Self::configure(source, &mut props)?;
        Ok(props)
    }

    fn configure(source: &dyn FrameSource, props: &mut AcquisitionProperties) -> DeviceResult<()> {
        source.configure(props).map_err(|e| {
            error!(device = DEVICE_NAME, error = %e, "Configure failed");
            DeviceError::ConfigureFailed(e)
        })
    }

    /// Apply `edit` to the source configuration and push it back.
    fn update_settings<F>(&self, edit: F) -> DeviceResult<()>
    where
        F: FnOnce(&mut AcquisitionProperties),
    {
        let source = self.source()?;
        let mut props = source.get_configuration().map_err(|e| {
            warn!(device = DEVICE_NAME, error = %e, "Error obtaining properties");
            DeviceError::Driver(e)
        })?;
        edit(&mut props);
        Self::configure(source.as_ref(), &mut props)
    }

    /// Line interval of stream 0 in microseconds.
    pub fn line_interval_us(&self) -> DeviceResult<f64> {
        let props = self.source()?.get_configuration()?;
        Ok(props.video[0].camera.settings.line_interval_us as f64)
    }

    /// Set the line interval of both cameras.
    pub fn set_line_interval_us(&mut self, line_interval_us: f64) -> DeviceResult<()> {
        self.update_settings(|props| {
            for video in props.video.iter_mut() {
                video.camera.settings.line_interval_us = line_interval_us as f32;
            }
        })?;
        self.base
            .properties
            .update(PROP_LINE_INTERVAL, format_float(line_interval_us))
    }

    /// One snap: configure both streams for a single frame, start, read,
    /// stop. Stop runs whatever the read returned, and also when this future
    /// is dropped mid-read.
    async fn acquire_once(&mut self) -> DeviceResult<()> {
        let source = self.source()?.clone();
        check_layout(self.mode, &self.images)?;

        let mut props = source.get_configuration()?;
        self.bind_devices(source.as_ref(), &mut props)?;

        let image = &self.images[0];
        let depth = image.depth();
        let shape = match self.mode {
            ImageMode::Multi => ImageShape::new(image.width(), image.height()),
            ImageMode::Single => ImageShape::new(image.width(), image.height() / 2),
        };
        for video in props.video.iter_mut() {
            video.camera.settings.binning = 1;
            video.camera.settings.pixel_type = SampleType::for_depth(depth);
            video.camera.settings.shape = shape;
            video.max_frame_count = 1;
        }
        Self::configure(source.as_ref(), &mut props)?;

        source.start().map_err(|e| {
            error!(device = DEVICE_NAME, error = %e, "Start failed");
            DeviceError::StartFailed(e)
        })?;
        let guard = StopGuard::new(source.clone());

        let compositor = FrameCompositor::new(source, self.config.wait_policy(), self.cancel.clone());
        let result = compositor.read_frames(self.mode, &mut self.images).await;
        let stopped = guard.stop();

        let outcomes = result?;
        stopped?;
        debug!(
            device = DEVICE_NAME,
            frame_0 = outcomes[0].header.frame_id,
            frame_1 = outcomes[1].header.frame_id,
            released_0 = outcomes[0].released_bytes,
            released_1 = outcomes[1].released_bytes,
            "Snap complete"
        );
        Ok(())
    }

    /// Repeat single-shot acquisitions and send each image set to `sink`.
    ///
    /// Stops after `count` sets, when the receiver is dropped, or when the
    /// cancel handle fires. Returns the number of sets delivered.
    pub async fn run_sequence(
        &mut self,
        count: usize,
        interval: Duration,
        sink: mpsc::Sender<Vec<ImageBuffer>>,
    ) -> DeviceResult<usize> {
        self.cancel.reset();
        let mut delivered = 0;

        for index in 0..count {
            match self.acquire_once().await {
                Ok(()) => {}
                Err(DeviceError::AcquisitionCancelled { .. }) => break,
                Err(e) => return Err(e),
            }

            if sink.send(self.images.clone()).await.is_err() {
                debug!(device = DEVICE_NAME, delivered, "Sequence receiver dropped");
                break;
            }
            delivered += 1;

            if index + 1 < count {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.cancel.cancelled() => break,
                }
            }
        }

        info!(device = DEVICE_NAME, delivered, requested = count, "Sequence finished");
        Ok(delivered)
    }

    fn image(&self) -> Option<&ImageBuffer> {
        self.images.first()
    }
}

impl Device for AcquireCamera {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Camera
    }

    fn busy(&self) -> bool {
        false
    }

    fn error_text(&self, code: i32) -> Option<String> {
        self.base.error_text(code)
    }

    fn properties(&self) -> &PropertyMap {
        &self.base.properties
    }

    fn set_property(&mut self, name: &str, value: &str) -> DeviceResult<()> {
        self.base.properties.check(name, value)?;
        match name {
            PROP_MODE => self.set_mode(value.parse()?),
            PROP_EXPOSURE => self.set_exposure(parse_float(name, value)?),
            PROP_LINE_INTERVAL => self.set_line_interval_us(parse_float(name, value)?),
            _ => self.base.properties.set(name, value),
        }
    }

    fn initialize(&mut self) -> DeviceResult<()> {
        if self.base.lifecycle.is_initialized() {
            return Ok(());
        }
        self.demo = self.base.properties.get(PROP_DEMO)? == "1";

        let source = (self.connector)(tracing_reporter(DEVICE_NAME)).map_err(|e| {
            error!(device = DEVICE_NAME, error = %e, "Runtime initialization failed");
            DeviceError::RuntimeInit(e)
        })?;

        let props = match self.prepare_source(source.as_ref()) {
            Ok(props) => props,
            Err(e) => {
                if let Err(shutdown) = source.shutdown() {
                    warn!(device = DEVICE_NAME, error = %shutdown, "Runtime shutdown error");
                }
                return Err(e);
            }
        };

        let settings = &props.video[0].camera.settings;
        let properties = &mut self.base.properties;
        properties.ensure(Property::integer(PROP_BINNING, 1).with_allowed_values(["1"]))?;
        properties.ensure(
            Property::string(PROP_MODE, MODE_MULTI).with_allowed_values([MODE_MULTI, MODE_SINGLE]),
        )?;
        properties.ensure(Property::float(
            PROP_LINE_INTERVAL,
            settings.line_interval_us as f64,
        ))?;
        properties.ensure(
            Property::float(PROP_EXPOSURE, settings.exposure_time_us as f64 / 1000.0)
                .with_limits(0.0, MAX_EXPOSURE_MS),
        )?;

        self.mode = ImageMode::Multi;
        self.source = Some(source);
        if let Err(e) = self.setup_buffers() {
            self.shutdown()?;
            return Err(e);
        }

        self.base.mark_initialized();
        info!(
            device = DEVICE_NAME,
            demo = self.demo,
            width = self.image_width(),
            height = self.image_height(),
            "Initialized"
        );
        Ok(())
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        self.cancel.cancel();
        if let Some(source) = self.source.take() {
            if let Err(e) = source.shutdown() {
                warn!(device = DEVICE_NAME, error = %e, "Runtime shutdown error");
            }
        }
        self.cancel.reset();
        self.base.mark_shutdown();
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.base.lifecycle.is_initialized()
    }
}

fn parse_float(name: &str, value: &str) -> DeviceResult<f64> {
    value
        .trim()
        .parse()
        .map_err(|_| DeviceError::InvalidPropertyValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}

#[async_trait]
impl Camera for AcquireCamera {
    async fn snap_image(&mut self) -> DeviceResult<()> {
        self.cancel.reset();
        let span = info_span!("snap_image", device = DEVICE_NAME, mode = %self.mode);
        self.acquire_once().instrument(span).await
    }

    fn image_buffer_for(&self, channel: usize) -> DeviceResult<&ImageBuffer> {
        self.images
            .get(channel)
            .ok_or(DeviceError::NonexistentChannel(channel))
    }

    fn number_of_channels(&self) -> usize {
        self.images.len()
    }

    fn channel_name(&self, channel: usize) -> DeviceResult<String> {
        if channel >= self.images.len() {
            return Err(DeviceError::NonexistentChannel(channel));
        }
        Ok(CHANNEL_NAMES[channel.min(1)].to_string())
    }

    fn image_width(&self) -> u32 {
        self.image().map_or(0, ImageBuffer::width)
    }

    fn image_height(&self) -> u32 {
        self.image().map_or(0, ImageBuffer::height)
    }

    fn image_bytes_per_pixel(&self) -> u32 {
        self.image().map_or(0, ImageBuffer::depth)
    }

    fn exposure(&self) -> DeviceResult<f64> {
        let props = self.source()?.get_configuration().map_err(|e| {
            warn!(device = DEVICE_NAME, error = %e, "Error obtaining properties");
            DeviceError::Driver(e)
        })?;
        Ok(props.video[0].camera.settings.exposure_time_us as f64 / 1000.0)
    }

    fn set_exposure(&mut self, exposure_ms: f64) -> DeviceResult<()> {
        let exposure_us = (exposure_ms * 1000.0) as f32;
        self.update_settings(|props| {
            for video in props.video.iter_mut() {
                video.camera.settings.exposure_time_us = exposure_us;
            }
        })
        .inspect_err(|e| warn!(device = DEVICE_NAME, error = %e, "Error setting exposure"))?;
        self.base
            .properties
            .update(PROP_EXPOSURE, format_float(exposure_ms))
    }

    fn set_binning(&mut self, _binning: u32) -> DeviceResult<()> {
        Ok(())
    }

    fn set_roi(&mut self, _roi: Roi) -> DeviceResult<()> {
        Ok(())
    }

    fn clear_roi(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

impl Drop for AcquireCamera {
    fn drop(&mut self) {
        if self.source.is_some() {
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for AcquireCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquireCamera")
            .field("initialized", &self.base.lifecycle.is_initialized())
            .field("demo", &self.demo)
            .field("mode", &self.mode)
            .field("images", &self.images.len())
            .finish()
    }
}
