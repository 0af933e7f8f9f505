//! In-process frame source with simulated cameras and storage sinks.
//!
//! Cameras:
//! - "simulated: uniform random": seeded ChaCha noise
//! - "simulated: radial sin": concentric sine rings drifting outwards per frame
//! - "simulated: empty": zero-filled frames
//!
//! Storage sinks ("Trash", "Raw", "Tiff") are accepted as bindings only; the
//! adapter reads frames from the rings before anything would be stored.
//!
//! Each bound stream gets a tokio producer task that sleeps for the exposure
//! time, writes one record into the stream's [`FrameRing`] and wakes waiters.

use async_trait::async_trait;
use mmdev_core::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::frame::{FrameHeader, MappedRegion, SampleType, HEADER_SIZE};
use super::ring::FrameRing;
use super::source::{
    AcquisitionProperties, CameraSettings, DeviceIdentifier, DeviceKind, FrameSource, LogRecord,
    Reporter, SourceConnector, StreamId, DRIVER_TYPE, MAX_VIDEO_STREAMS,
};

/// Seeded noise.
pub const CAMERA_UNIFORM_RANDOM: &str = "simulated: uniform random";
/// Concentric sine rings drifting per frame.
pub const CAMERA_RADIAL_SIN: &str = "simulated: radial sin";
/// Zero-filled frames.
pub const CAMERA_EMPTY: &str = "simulated: empty";

const CAMERAS: [&str; 3] = [CAMERA_UNIFORM_RANDOM, CAMERA_RADIAL_SIN, CAMERA_EMPTY];
const STORAGE: [&str; 3] = ["Trash", "Raw", "Tiff"];

macro_rules! report {
    ($shared:expr, $is_error:expr, $function:expr, $($arg:tt)*) => {
        ($shared.reporter)(&LogRecord {
            is_error: $is_error,
            file: file!().to_string(),
            line: line!(),
            function: $function.to_string(),
            message: format!($($arg)*),
        })
    };
}

/// Settings of a [`SimulatedRuntime`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Fixed seed for the noise camera; random when `None`.
    pub seed: Option<u64>,
    /// Ring capacity per stream, in frames.
    pub ring_frames: usize,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            seed: None,
            ring_frames: 4,
        }
    }
}

/// Connector that opens a fresh [`SimulatedRuntime`] per device.
pub fn simulated_connector(config: SimulatedConfig) -> SourceConnector {
    Arc::new(move |reporter: Reporter| {
        let runtime: Arc<dyn FrameSource> = Arc::new(SimulatedRuntime::new(config.clone(), reporter));
        Ok(runtime)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    UniformRandom,
    RadialSin,
    Empty,
}

impl Pattern {
    fn for_camera(name: &str) -> Option<Self> {
        match name {
            CAMERA_UNIFORM_RANDOM => Some(Pattern::UniformRandom),
            CAMERA_RADIAL_SIN => Some(Pattern::RadialSin),
            CAMERA_EMPTY => Some(Pattern::Empty),
            _ => None,
        }
    }

    fn fill(self, payload: &mut [u8], settings: &CameraSettings, frame_id: u64, rng: &mut ChaCha8Rng) {
        match self {
            Pattern::UniformRandom => rng.fill_bytes(payload),
            Pattern::Empty => payload.fill(0),
            Pattern::RadialSin => {
                let bpp = settings.pixel_type.bytes_per_pixel();
                let width = settings.shape.width as usize;
                let cx = settings.shape.width as f64 / 2.0;
                let cy = settings.shape.height as f64 / 2.0;
                let phase = frame_id as f64 * 0.5;

                for (idx, px) in payload.chunks_exact_mut(bpp).enumerate() {
                    let x = (idx % width.max(1)) as f64 - cx;
                    let y = (idx / width.max(1)) as f64 - cy;
                    let r = (x * x + y * y).sqrt();
                    let v = 0.5 * (1.0 + (r * 0.1 - phase).sin());
                    match settings.pixel_type {
                        SampleType::F32 => px.copy_from_slice(&(v as f32).to_le_bytes()),
                        _ if bpp == 2 => {
                            let max = ((1u32 << settings.pixel_type.bit_depth()) - 1) as f64;
                            px.copy_from_slice(&((v * max) as u16).to_le_bytes());
                        }
                        _ => px[0] = (v * 255.0) as u8,
                    }
                }
            }
        }
    }
}

struct StreamSlot {
    ring: Mutex<FrameRing>,
    notify: Notify,
}

struct Shared {
    reporter: Reporter,
    streams: [StreamSlot; MAX_VIDEO_STREAMS],
}

impl Shared {
    fn slot(&self, stream: StreamId) -> Result<&StreamSlot, DriverError> {
        self.streams.get(stream.index()).ok_or_else(|| {
            DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("stream {} does not exist", stream),
            )
        })
    }
}

#[derive(Default)]
struct RuntimeState {
    properties: AcquisitionProperties,
    running: bool,
    shut_down: bool,
    producers: Vec<JoinHandle<()>>,
}

/// Simulated two-stream acquisition runtime.
pub struct SimulatedRuntime {
    config: SimulatedConfig,
    shared: Arc<Shared>,
    state: Mutex<RuntimeState>,
}

impl SimulatedRuntime {
    /// Open a runtime; lifecycle and error lines go to `reporter`.
    pub fn new(config: SimulatedConfig, reporter: Reporter) -> Self {
        let slot = || StreamSlot {
            ring: Mutex::new(FrameRing::new(0)),
            notify: Notify::new(),
        };
        let shared = Arc::new(Shared {
            reporter,
            streams: [slot(), slot()],
        });
        report!(shared, false, "new", "simulated runtime ready");
        Self {
            config,
            shared,
            state: Mutex::new(RuntimeState::default()),
        }
    }

    /// Whether producers are running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Frames discarded on `stream` because its ring was full.
    pub fn dropped_frames(&self, stream: StreamId) -> u64 {
        self.shared
            .slot(stream)
            .map(|s| s.ring.lock().dropped())
            .unwrap_or(0)
    }

    fn identifier(kind: DeviceKind, id: usize, name: &str) -> DeviceIdentifier {
        DeviceIdentifier {
            kind,
            id: id as u8,
            name: name.to_string(),
        }
    }

    fn check_open(&self, state: &RuntimeState) -> Result<(), DriverError> {
        if state.shut_down {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidState,
                "runtime has been shut down",
            ));
        }
        Ok(())
    }

    fn validate(properties: &AcquisitionProperties) -> Result<(), DriverError> {
        let invalid = |message: String| {
            DriverError::new(DRIVER_TYPE, DriverErrorKind::Configuration, message)
        };

        for (index, video) in properties.video.iter().enumerate() {
            if let Some(camera) = &video.camera.identifier {
                if camera.kind != DeviceKind::Camera || !CAMERAS.contains(&camera.name.as_str()) {
                    return Err(invalid(format!(
                        "stream {}: '{}' is not a simulated camera",
                        index, camera.name
                    )));
                }
            }
            if let Some(storage) = &video.storage.identifier {
                if storage.kind != DeviceKind::Storage || !STORAGE.contains(&storage.name.as_str()) {
                    return Err(invalid(format!(
                        "stream {}: '{}' is not a storage device",
                        index, storage.name
                    )));
                }
            }

            let settings = &video.camera.settings;
            if settings.shape.width == 0 || settings.shape.height == 0 {
                return Err(invalid(format!("stream {}: frame shape must be non-zero", index)));
            }
            if settings.binning != 1 {
                return Err(invalid(format!(
                    "stream {}: binning {} unsupported, simulated cameras bin by 1",
                    index, settings.binning
                )));
            }
            exposure_duration(settings)
                .map_err(|e| invalid(format!("stream {}: {}", index, e.message)))?;
        }
        Ok(())
    }
}

/// Exposure as a sleep duration; rejects values a `Duration` cannot hold.
fn exposure_duration(settings: &CameraSettings) -> Result<Duration, DriverError> {
    let exposure_us = settings.exposure_time_us;
    if !exposure_us.is_finite() || exposure_us < 0.0 {
        return Err(DriverError::new(
            DRIVER_TYPE,
            DriverErrorKind::InvalidParameter,
            format!("invalid exposure {} us", exposure_us),
        ));
    }
    Duration::try_from_secs_f64(f64::from(exposure_us) / 1_000_000.0).map_err(|e| {
        DriverError::new(
            DRIVER_TYPE,
            DriverErrorKind::InvalidParameter,
            format!("exposure {} us out of range: {}", exposure_us, e),
        )
    })
}

async fn produce(
    shared: Arc<Shared>,
    stream: StreamId,
    pattern: Pattern,
    settings: CameraSettings,
    max_frame_count: u64,
    seed: u64,
) {
    let exposure = match exposure_duration(&settings) {
        Ok(exposure) => exposure,
        Err(e) => {
            report!(shared, true, "produce", "stream {}: {}", stream, e.message);
            return;
        }
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut payload = vec![0u8; settings.shape.pixels() * settings.pixel_type.bytes_per_pixel()];
    let started = Instant::now();
    let slot = &shared.streams[stream.index()];
    let mut frame_id = 0u64;

    while max_frame_count == 0 || frame_id < max_frame_count {
        tokio::time::sleep(exposure).await;
        pattern.fill(&mut payload, &settings, frame_id, &mut rng);

        let record = FrameHeader {
            bytes_of_frame: 0,
            frame_id,
            hardware_frame_id: frame_id,
            timestamp_ns: started.elapsed().as_nanos() as u64,
            width: settings.shape.width,
            height: settings.shape.height,
            sample_type: settings.pixel_type,
        }
        .encode(&payload);

        if !slot.ring.lock().push(record) {
            report!(shared, false, "produce", "stream {}: ring full, frame {} dropped", stream, frame_id);
        }
        slot.notify.notify_waiters();
        frame_id += 1;
    }
}

#[async_trait]
impl FrameSource for SimulatedRuntime {
    fn devices(&self) -> Vec<DeviceIdentifier> {
        CAMERAS
            .iter()
            .enumerate()
            .map(|(i, name)| Self::identifier(DeviceKind::Camera, i, name))
            .chain(
                STORAGE
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Self::identifier(DeviceKind::Storage, i, name)),
            )
            .collect()
    }

    fn select_device(&self, kind: DeviceKind, pattern: &str) -> Result<DeviceIdentifier, DriverError> {
        let re = Regex::new(pattern).map_err(|e| {
            DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("bad device pattern '{}': {}", pattern, e),
            )
        })?;

        self.devices()
            .into_iter()
            .find(|d| d.kind == kind && re.is_match(&d.name))
            .ok_or_else(|| {
                report!(self.shared, true, "select_device", "no {} matches '{}'", kind, pattern);
                DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::Configuration,
                    format!("no {} device matches '{}'", kind, pattern),
                )
            })
    }

    fn get_configuration(&self) -> Result<AcquisitionProperties, DriverError> {
        let state = self.state.lock();
        self.check_open(&state)?;
        Ok(state.properties.clone())
    }

    fn configure(&self, properties: &mut AcquisitionProperties) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        if state.running {
            report!(self.shared, true, "configure", "configure called while running");
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidState,
                "cannot configure while acquisition is running",
            ));
        }
        if let Err(e) = Self::validate(properties) {
            report!(self.shared, true, "configure", "{}", e.message);
            return Err(e);
        }

        state.properties = properties.clone();
        report!(self.shared, false, "configure", "configuration accepted");
        Ok(())
    }

    fn start(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        self.check_open(&state)?;
        if state.running {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidState,
                "acquisition already running",
            ));
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidState,
                format!("no async runtime to host producers: {}", e),
            )
        })?;

        let base_seed = self.config.seed.unwrap_or_else(rand::random);
        let mut producers = Vec::new();
        for (index, video) in state.properties.video.iter().enumerate() {
            let Some(pattern) = video
                .camera
                .identifier
                .as_ref()
                .and_then(|id| Pattern::for_camera(&id.name))
            else {
                continue;
            };

            let settings = video.camera.settings.clone();
            let record_len = HEADER_SIZE + settings.shape.pixels() * settings.pixel_type.bytes_per_pixel();
            *self.shared.streams[index].ring.lock() =
                FrameRing::new(record_len * self.config.ring_frames.max(1));

            producers.push(handle.spawn(produce(
                self.shared.clone(),
                StreamId(index),
                pattern,
                settings,
                video.max_frame_count,
                base_seed.wrapping_add(index as u64),
            )));
        }

        if producers.is_empty() {
            report!(self.shared, true, "start", "no stream has a camera bound");
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                "no stream has a camera bound",
            ));
        }

        report!(self.shared, false, "start", "{} stream(s) running", producers.len());
        state.producers = producers;
        state.running = true;
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        for producer in state.producers.drain(..) {
            producer.abort();
        }
        if state.running {
            state.running = false;
            for (index, slot) in self.shared.streams.iter().enumerate() {
                let ring = slot.ring.lock();
                report!(
                    self.shared,
                    false,
                    "stop",
                    "stream {}: {} of {} bytes released",
                    index,
                    ring.read_tail(),
                    ring.write_head()
                );
            }
            report!(self.shared, false, "stop", "acquisition stopped");
        }
        Ok(())
    }

    fn map_read(&self, stream: StreamId) -> Result<MappedRegion, DriverError> {
        let slot = self.shared.slot(stream)?;
        let span = slot.ring.lock().span();
        Ok(MappedRegion::new(stream, span))
    }

    fn unmap_read(&self, stream: StreamId, consumed: usize) -> Result<(), DriverError> {
        let slot = self.shared.slot(stream)?;
        let result = slot.ring.lock().advance_tail(consumed);
        if let Err(e) = &result {
            report!(self.shared, true, "unmap_read", "stream {}: {}", stream, e.message);
        }
        result
    }

    async fn wait_for_data(&self, stream: StreamId, max_wait: Duration) {
        let Ok(slot) = self.shared.slot(stream) else {
            tokio::time::sleep(max_wait).await;
            return;
        };

        let notified = slot.notify.notified();
        let mut notified = std::pin::pin!(notified);
        notified.as_mut().enable();
        if !slot.ring.lock().is_empty() {
            return;
        }
        let _ = tokio::time::timeout(max_wait, notified).await;
    }

    fn shutdown(&self) -> Result<(), DriverError> {
        self.stop()?;
        let mut state = self.state.lock();
        if !state.shut_down {
            state.shut_down = true;
            report!(self.shared, false, "shutdown", "runtime shut down");
        }
        Ok(())
    }
}

impl Drop for SimulatedRuntime {
    fn drop(&mut self) {
        for producer in self.state.get_mut().producers.drain(..) {
            producer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::frame::FrameRecord;
    use crate::components::source::ImageShape;

    fn quiet() -> Reporter {
        Arc::new(|_: &LogRecord| {})
    }

    fn runtime() -> SimulatedRuntime {
        SimulatedRuntime::new(
            SimulatedConfig {
                seed: Some(7),
                ring_frames: 2,
            },
            quiet(),
        )
    }

    fn bind_both(rt: &SimulatedRuntime, shape: ImageShape, max_frames: u64) -> AcquisitionProperties {
        let mut props = rt.get_configuration().unwrap();
        props.video[0].camera.identifier =
            Some(rt.select_device(DeviceKind::Camera, "simulated.*random.*").unwrap());
        props.video[1].camera.identifier =
            Some(rt.select_device(DeviceKind::Camera, "simulated.*sin.*").unwrap());
        for video in props.video.iter_mut() {
            video.storage.identifier = Some(rt.select_device(DeviceKind::Storage, "Trash").unwrap());
            video.camera.settings.shape = shape;
            video.camera.settings.exposure_time_us = 1_000.0;
            video.max_frame_count = max_frames;
        }
        rt.configure(&mut props).unwrap();
        props
    }

    #[test]
    fn test_select_by_regex() {
        let rt = runtime();
        assert_eq!(
            rt.select_device(DeviceKind::Camera, "simulated.*sin.*").unwrap().name,
            CAMERA_RADIAL_SIN
        );
        assert_eq!(
            rt.select_device(DeviceKind::Camera, "random").unwrap().name,
            CAMERA_UNIFORM_RANDOM
        );
        assert!(rt.select_device(DeviceKind::Storage, "simulated").is_err());
        assert!(rt.select_device(DeviceKind::Camera, "(").is_err());
    }

    #[test]
    fn test_configure_rejects_bad_settings() {
        let rt = runtime();
        let mut props = rt.get_configuration().unwrap();
        props.video[0].camera.settings.binning = 2;
        assert!(rt.configure(&mut props).is_err());

        let mut props = rt.get_configuration().unwrap();
        props.video[1].camera.identifier = Some(rt.select_device(DeviceKind::Storage, "Tiff").unwrap());
        let err = rt.configure(&mut props).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Configuration);
    }

    #[test]
    fn test_configure_rejects_unrepresentable_exposure() {
        let rt = runtime();
        let mut props = rt.get_configuration().unwrap();
        props.video[0].camera.settings.exposure_time_us = f32::MAX;
        let err = rt.configure(&mut props).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Configuration);
        assert!(err.message.contains("out of range"));

        props.video[0].camera.settings.exposure_time_us = f32::NAN;
        assert!(rt.configure(&mut props).is_err());
        assert!(exposure_duration(&CameraSettings::default()).is_ok());
    }

    #[tokio::test]
    async fn test_start_requires_a_bound_camera() {
        let rt = runtime();
        assert!(rt.start().is_err());
        assert!(!rt.is_running());
    }

    #[tokio::test]
    async fn test_single_frame_per_stream() {
        let rt = runtime();
        bind_both(&rt, ImageShape::new(8, 4), 1);
        rt.start().unwrap();

        for stream in [StreamId(0), StreamId(1)] {
            rt.wait_for_data(stream, Duration::from_secs(1)).await;
            let region = rt.map_read(stream).unwrap();
            let frame = FrameRecord::parse(region.as_bytes()).unwrap();
            assert_eq!(frame.payload().len(), 32);
            assert_eq!((frame.header.width, frame.header.height), (8, 4));
            rt.unmap_read(stream, region.len()).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rt.map_read(StreamId(0)).unwrap().is_empty());
        rt.stop().unwrap();
        assert!(!rt.is_running());
    }

    #[tokio::test]
    async fn test_configure_while_running_fails() {
        let rt = runtime();
        let mut props = bind_both(&rt, ImageShape::new(4, 4), 0);
        rt.start().unwrap();
        let err = rt.configure(&mut props).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidState);
        rt.shutdown().unwrap();
        assert!(rt.get_configuration().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_ring_counts_drops() {
        let rt = runtime();
        bind_both(&rt, ImageShape::new(4, 4), 5);
        rt.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let region = rt.map_read(StreamId(0)).unwrap();
        assert_eq!(region.frames().count(), 2);
        assert_eq!(rt.dropped_frames(StreamId(0)), 3);
        rt.stop().unwrap();
    }

    #[tokio::test]
    async fn test_stop_reports_released_bytes() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let reporter: Reporter = Arc::new(move |r: &LogRecord| sink.lock().push(r.message.clone()));
        let rt = SimulatedRuntime::new(
            SimulatedConfig {
                seed: Some(7),
                ring_frames: 2,
            },
            reporter,
        );
        bind_both(&rt, ImageShape::new(4, 4), 1);
        rt.start().unwrap();

        rt.wait_for_data(StreamId(0), Duration::from_secs(1)).await;
        let region = rt.map_read(StreamId(0)).unwrap();
        rt.unmap_read(StreamId(0), region.len()).unwrap();
        rt.stop().unwrap();

        let lines = lines.lock();
        assert!(lines.iter().any(|l| l == "stream 0: 64 of 64 bytes released"));
        assert!(lines.iter().any(|l| l == "acquisition stopped"));
    }

    #[test]
    fn test_reporter_receives_runtime_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let reporter: Reporter = Arc::new(move |r: &LogRecord| sink.lock().push(r.to_host_line()));
        let rt = SimulatedRuntime::new(SimulatedConfig::default(), reporter);
        let _ = rt.select_device(DeviceKind::Camera, "nothing-here");

        let lines = lines.lock();
        assert!(lines.iter().any(|l| l.contains("new: simulated runtime ready")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("ERROR ") && l.contains("select_device: no camera matches")));
    }
}
