//! Failure paths of the snap session: configure, start, read and cancel.
//!
//! `FaultySource` wraps a real `SimulatedRuntime` and fails or starves on
//! demand, counting the lifecycle calls the camera makes on it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mmdev_core::{codes, Camera, Device, DeviceError, DriverError, DriverErrorKind};
use mmdev_driver_acquire::camera::{MAX_EXPOSURE_MS, PROP_DEMO, PROP_EXPOSURE, PROP_MODE};
use mmdev_driver_acquire::components::frame::MappedRegion;
use mmdev_driver_acquire::components::simulated::{SimulatedConfig, SimulatedRuntime};
use mmdev_driver_acquire::components::source::{
    AcquisitionProperties, DeviceIdentifier, DeviceKind, FrameSource, Reporter, SourceConnector,
    StreamId,
};
use mmdev_driver_acquire::{AcquireCamera, AcquireCameraConfig, ImageMode};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct Faults {
    fail_get_configuration: AtomicBool,
    fail_configure: AtomicBool,
    fail_start: AtomicBool,
    /// Every map comes back empty and every wait runs its full step.
    starve: AtomicBool,
    /// Frames come out twice as wide as the camera asked for.
    oversize: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    shutdowns: AtomicUsize,
    runtime: Mutex<Option<Arc<SimulatedRuntime>>>,
}

impl Faults {
    fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn is(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn running(&self) -> bool {
        self.runtime.lock().as_ref().is_some_and(|rt| rt.is_running())
    }
}

fn injected(what: &str) -> DriverError {
    DriverError::new("acquire", DriverErrorKind::Hardware, format!("injected {} failure", what))
}

struct FaultySource {
    inner: Arc<SimulatedRuntime>,
    faults: Arc<Faults>,
}

#[async_trait]
impl FrameSource for FaultySource {
    fn devices(&self) -> Vec<DeviceIdentifier> {
        self.inner.devices()
    }

    fn select_device(&self, kind: DeviceKind, pattern: &str) -> Result<DeviceIdentifier, DriverError> {
        self.inner.select_device(kind, pattern)
    }

    fn get_configuration(&self) -> Result<AcquisitionProperties, DriverError> {
        if Faults::is(&self.faults.fail_get_configuration) {
            return Err(injected("get_configuration"));
        }
        self.inner.get_configuration()
    }

    fn configure(&self, properties: &mut AcquisitionProperties) -> Result<(), DriverError> {
        if Faults::is(&self.faults.fail_configure) {
            return Err(injected("configure"));
        }
        if Faults::is(&self.faults.oversize) {
            let mut wide = properties.clone();
            for video in wide.video.iter_mut() {
                video.camera.settings.shape.width *= 2;
            }
            return self.inner.configure(&mut wide);
        }
        self.inner.configure(properties)
    }

    fn start(&self) -> Result<(), DriverError> {
        self.faults.starts.fetch_add(1, Ordering::SeqCst);
        if Faults::is(&self.faults.fail_start) {
            return Err(injected("start"));
        }
        self.inner.start()
    }

    fn stop(&self) -> Result<(), DriverError> {
        self.faults.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.stop()
    }

    fn map_read(&self, stream: StreamId) -> Result<MappedRegion, DriverError> {
        if Faults::is(&self.faults.starve) {
            return Ok(MappedRegion::new(stream, Bytes::new()));
        }
        self.inner.map_read(stream)
    }

    fn unmap_read(&self, stream: StreamId, consumed: usize) -> Result<(), DriverError> {
        self.inner.unmap_read(stream, consumed)
    }

    async fn wait_for_data(&self, stream: StreamId, max_wait: Duration) {
        if Faults::is(&self.faults.starve) {
            tokio::time::sleep(max_wait).await;
            return;
        }
        self.inner.wait_for_data(stream, max_wait).await
    }

    fn shutdown(&self) -> Result<(), DriverError> {
        self.faults.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown()
    }
}

fn small_config() -> AcquireCameraConfig {
    AcquireCameraConfig {
        width: 64,
        height: 48,
        seed: Some(7),
        timeout_ms: 2_000,
        ..AcquireCameraConfig::default()
    }
}

fn faulty_camera(config: AcquireCameraConfig) -> (AcquireCamera, Arc<Faults>) {
    let faults = Arc::new(Faults::default());
    let shared = faults.clone();
    let connector: SourceConnector = Arc::new(
        move |reporter: Reporter| -> Result<Arc<dyn FrameSource>, DriverError> {
            let inner = Arc::new(SimulatedRuntime::new(
                SimulatedConfig {
                    seed: Some(7),
                    ring_frames: 2,
                },
                reporter,
            ));
            *shared.runtime.lock() = Some(inner.clone());
            Ok(Arc::new(FaultySource {
                inner,
                faults: shared.clone(),
            }))
        },
    );
    let camera = AcquireCamera::with_connector(config, connector).unwrap();
    (camera, faults)
}

fn ready_camera(config: AcquireCameraConfig) -> (AcquireCamera, Arc<Faults>) {
    let (mut camera, faults) = faulty_camera(config);
    camera.initialize().unwrap();
    camera.set_exposure(1.0).unwrap();
    (camera, faults)
}

/// After a failed snap the runtime is idle, still answers, and snaps again.
async fn assert_recovers(camera: &mut AcquireCamera, faults: &Faults) {
    assert!(!faults.running());
    assert!(camera.source().unwrap().get_configuration().is_ok());
    camera.snap_image().await.unwrap();
    assert!(!faults.running());
}

#[tokio::test]
async fn test_dropped_snap_stops_acquisition() {
    let (mut camera, faults) = ready_camera(small_config());
    camera.set_exposure(2_000.0).unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(50), camera.snap_image()).await;
    assert!(abandoned.is_err());
    assert_eq!(Faults::count(&faults.stops), 1);
    assert!(!faults.running());

    camera.set_exposure(1.0).unwrap();
    assert_recovers(&mut camera, &faults).await;
}

#[tokio::test]
async fn test_rejected_configure_reports_configure_failed() {
    let (mut camera, faults) = ready_camera(small_config());
    Faults::set(&faults.fail_configure, true);

    let err = camera.set_exposure(3.0).unwrap_err();
    assert!(matches!(err, DeviceError::ConfigureFailed(_)));
    assert_eq!(err.code(), codes::ERR_CONFIGURE_FAILED);
    assert_eq!(camera.get_property(PROP_EXPOSURE).unwrap(), "1.0000");

    let err = camera.snap_image().await.unwrap_err();
    assert!(matches!(err, DeviceError::ConfigureFailed(_)));
    assert_eq!(Faults::count(&faults.starts), 0);

    Faults::set(&faults.fail_configure, false);
    assert_recovers(&mut camera, &faults).await;
}

#[tokio::test]
async fn test_start_failure_leaves_source_stopped() {
    let (mut camera, faults) = ready_camera(small_config());
    Faults::set(&faults.fail_start, true);

    let err = camera.snap_image().await.unwrap_err();
    assert!(matches!(err, DeviceError::StartFailed(_)));
    assert_eq!(err.code(), codes::ERR_START_FAILED);
    assert_eq!(Faults::count(&faults.starts), 1);
    assert_eq!(Faults::count(&faults.stops), 0);

    Faults::set(&faults.fail_start, false);
    assert_recovers(&mut camera, &faults).await;
}

#[tokio::test]
async fn test_read_timeout_still_stops_source() {
    let config = AcquireCameraConfig {
        timeout_ms: 100,
        ..small_config()
    };
    let (mut camera, faults) = ready_camera(config);
    Faults::set(&faults.starve, true);

    let err = camera.snap_image().await.unwrap_err();
    match err {
        DeviceError::AcquisitionTimeout { stream, waited_ms } => {
            assert_eq!(stream, 0);
            assert!(waited_ms >= 100);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(Faults::count(&faults.stops), 1);

    Faults::set(&faults.starve, false);
    assert_recovers(&mut camera, &faults).await;
}

#[tokio::test]
async fn test_oversized_frame_still_stops_source() {
    let (mut camera, faults) = ready_camera(small_config());
    Faults::set(&faults.oversize, true);

    let err = camera.snap_image().await.unwrap_err();
    assert!(matches!(
        err,
        DeviceError::FrameTooLarge {
            stream: 0,
            bytes: 6144,
            capacity: 3072
        }
    ));
    assert_eq!(Faults::count(&faults.stops), 1);

    Faults::set(&faults.oversize, false);
    assert_recovers(&mut camera, &faults).await;
}

#[tokio::test]
async fn test_cancel_during_snap() {
    let config = AcquireCameraConfig {
        timeout_ms: 0,
        ..small_config()
    };
    let (mut camera, faults) = ready_camera(config);
    Faults::set(&faults.starve, true);
    let handle = camera.cancel_handle();

    let (result, ()) = tokio::join!(camera.snap_image(), async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
    });
    assert!(matches!(
        result,
        Err(DeviceError::AcquisitionCancelled { stream: 0 })
    ));
    assert_eq!(Faults::count(&faults.stops), 1);

    // The next snap clears the cancel flag.
    Faults::set(&faults.starve, false);
    assert_recovers(&mut camera, &faults).await;
}

#[tokio::test]
async fn test_cancel_during_sequence_returns_early() {
    let (mut camera, faults) = ready_camera(small_config());
    let handle = camera.cancel_handle();
    let (tx, mut rx) = mpsc::channel(1_000);

    let (result, ()) = tokio::join!(
        camera.run_sequence(1_000, Duration::from_millis(10), tx),
        async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            handle.cancel();
        }
    );
    let delivered = result.unwrap();
    assert!(delivered < 1_000);
    assert!(!faults.running());

    let mut received = 0;
    while rx.recv().await.is_some() {
        received += 1;
    }
    assert_eq!(received, delivered);
}

#[tokio::test]
async fn test_unrepresentable_exposure_is_rejected() {
    let (mut camera, _faults) = ready_camera(small_config());

    let too_long = (MAX_EXPOSURE_MS * 2.0).to_string();
    assert!(camera.set_property(PROP_EXPOSURE, &too_long).is_err());

    let err = camera.set_exposure(f64::from(f32::MAX)).unwrap_err();
    assert!(matches!(err, DeviceError::ConfigureFailed(_)));
    assert_eq!(camera.exposure().unwrap(), 1.0);
}

#[tokio::test]
async fn test_configure_failure_during_initialize_shuts_runtime_down() {
    let (mut camera, faults) = faulty_camera(small_config());
    Faults::set(&faults.fail_configure, true);

    let err = camera.initialize().unwrap_err();
    assert!(matches!(err, DeviceError::ConfigureFailed(_)));
    assert_eq!(Faults::count(&faults.shutdowns), 1);
    assert!(!camera.is_initialized());
    assert!(matches!(camera.source(), Err(DeviceError::NotInitialized)));

    Faults::set(&faults.fail_configure, false);
    camera.initialize().unwrap();
    assert!(camera.is_initialized());
    assert_eq!(Faults::count(&faults.shutdowns), 1);
}

#[tokio::test]
async fn test_unmatched_pattern_during_initialize_shuts_runtime_down() {
    let config = AcquireCameraConfig {
        storage_pattern: "nowhere".to_string(),
        ..small_config()
    };
    let (mut camera, faults) = faulty_camera(config);

    let err = camera.initialize().unwrap_err();
    assert!(matches!(err, DeviceError::DeviceSelect { .. }));
    assert_eq!(Faults::count(&faults.shutdowns), 1);
}

#[tokio::test]
async fn test_failed_mode_switch_keeps_layout() {
    let (mut camera, faults) = faulty_camera(small_config());
    camera.set_property(PROP_DEMO, "0").unwrap();
    camera.initialize().unwrap();
    assert_eq!(camera.number_of_channels(), 2);

    Faults::set(&faults.fail_get_configuration, true);
    assert!(camera.set_mode(ImageMode::Single).is_err());
    assert_eq!(camera.mode(), ImageMode::Multi);
    assert_eq!(camera.get_property(PROP_MODE).unwrap(), "Multi");
    assert_eq!(camera.number_of_channels(), 2);

    Faults::set(&faults.fail_get_configuration, false);
    camera.set_mode(ImageMode::Single).unwrap();
    assert_eq!(camera.get_property(PROP_MODE).unwrap(), "Single");
    assert_eq!(camera.number_of_channels(), 1);
    assert_eq!(camera.image_height(), 960);
}
