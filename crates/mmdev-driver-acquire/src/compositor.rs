//! Dual-stream frame compositor.
//!
//! Pulls exactly one frame from each stream per acquisition and places it in
//! the output images according to [`ImageMode`]:
//!
//! ```text
//! Multi:   stream 0 -> images[0]          stream 1 -> images[1]
//! Single:  stream 0 -> images[0] top half stream 1 -> images[0] bottom half
//! ```
//!
//! Streams are read one after the other. Stream 0 is copied and released
//! before stream 1 is polled.
//!
//! Each read maps the stream's ready span. When the span is empty it waits
//! (event driven when the source supports it, never longer than the poll
//! interval per step) until data shows up, the deadline passes or the
//! acquisition is cancelled. On success the first frame's payload is copied
//! and the whole visible span is released; extra frames in the span are
//! discarded.

use mmdev_core::{DeviceError, DeviceResult, ImageBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::components::frame::FrameHeader;
use crate::components::source::{FrameSource, StreamId};

/// Default upper bound of one wait step.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Default per-stream read deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Text of [`ImageMode::Multi`].
pub const MODE_MULTI: &str = "Multi";
/// Text of [`ImageMode::Single`].
pub const MODE_SINGLE: &str = "Single";

/// Output image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageMode {
    /// One image per stream.
    #[default]
    Multi,
    /// Both streams stacked vertically in one image of double height.
    Single,
}

impl ImageMode {
    /// Value of the `Mode` property for this layout.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageMode::Multi => MODE_MULTI,
            ImageMode::Single => MODE_SINGLE,
        }
    }

    /// Images the layout needs.
    pub fn image_count(self) -> usize {
        match self {
            ImageMode::Multi => 2,
            ImageMode::Single => 1,
        }
    }
}

impl std::fmt::Display for ImageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImageMode {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MODE_MULTI => Ok(ImageMode::Multi),
            MODE_SINGLE => Ok(ImageMode::Single),
            other => Err(DeviceError::InvalidPropertyValue {
                name: "Mode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Allocate images for `mode`, each stream frame being `width x height`.
pub fn allocate_images(mode: ImageMode, width: u32, height: u32, depth: u32) -> Vec<ImageBuffer> {
    match mode {
        ImageMode::Multi => vec![
            ImageBuffer::new(width, height, depth),
            ImageBuffer::new(width, height, depth),
        ],
        ImageMode::Single => vec![ImageBuffer::new(width, height * 2, depth)],
    }
}

/// How long a read waits for an empty stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Upper bound of one wait step while a stream is empty.
    pub poll_interval: Duration,
    /// Total bound per stream read; `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag for in-flight acquisitions.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Token that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the token and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether `cancel` was called since the last reset.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag for the next acquisition.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// What one stream read did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Stream the frame came from.
    pub stream: StreamId,
    /// Header of the copied frame.
    pub header: FrameHeader,
    /// Bytes copied into the destination.
    pub payload_bytes: usize,
    /// Bytes handed back to the source (the whole mapped span).
    pub released_bytes: usize,
    /// Frames that were visible in the span; all but the first are discarded.
    pub frames_in_span: usize,
    /// Empty polls before data showed up.
    pub empty_polls: u32,
}

/// Reads one frame per stream from a [`FrameSource`] into output images.
pub struct FrameCompositor {
    source: Arc<dyn FrameSource>,
    policy: WaitPolicy,
    cancel: CancelToken,
}

impl FrameCompositor {
    /// Compositor reading from `source`.
    pub fn new(source: Arc<dyn FrameSource>, policy: WaitPolicy, cancel: CancelToken) -> Self {
        Self {
            source,
            policy,
            cancel,
        }
    }

    /// Token checked before and during every wait.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Wait for one frame on `stream`, copy its payload to the start of
    /// `dest`, then release the whole visible span.
    pub async fn read_frame(&self, stream: StreamId, dest: &mut [u8]) -> DeviceResult<ReadOutcome> {
        let started = Instant::now();
        let mut empty_polls = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(DeviceError::AcquisitionCancelled {
                    stream: stream.index(),
                });
            }

            let region = self.source.map_read(stream)?;
            let first = match region.first() {
                Ok(first) => first,
                Err(e) => {
                    // Nothing consumed, but the span must not stay mapped.
                    if let Err(release) = self.source.unmap_read(region.stream(), 0) {
                        warn!(
                            stream = stream.index(),
                            error = %release,
                            "Release after malformed frame failed"
                        );
                    }
                    return Err(DeviceError::Driver(e));
                }
            };
            if let Some(frame) = first {
                let payload = frame.payload();
                if payload.len() > dest.len() {
                    self.source.unmap_read(stream, 0)?;
                    return Err(DeviceError::FrameTooLarge {
                        stream: stream.index(),
                        bytes: payload.len(),
                        capacity: dest.len(),
                    });
                }
                dest[..payload.len()].copy_from_slice(payload);

                let frames_in_span = region.frames().count();
                if frames_in_span > 1 {
                    debug!(
                        stream = stream.index(),
                        discarded = frames_in_span - 1,
                        "Releasing extra frames with the copied one"
                    );
                }

                let released = region.len();
                self.source.unmap_read(stream, released)?;
                trace!(
                    stream = stream.index(),
                    frame_id = frame.header.frame_id,
                    bytes = payload.len(),
                    "Frame copied"
                );

                return Ok(ReadOutcome {
                    stream,
                    header: frame.header,
                    payload_bytes: payload.len(),
                    released_bytes: released,
                    frames_in_span,
                    empty_polls,
                });
            }

            empty_polls += 1;
            let step = match self.policy.timeout {
                Some(timeout) => {
                    let elapsed = started.elapsed();
                    if elapsed >= timeout {
                        return Err(DeviceError::AcquisitionTimeout {
                            stream: stream.index(),
                            waited_ms: elapsed.as_millis() as u64,
                        });
                    }
                    self.policy.poll_interval.min(timeout - elapsed)
                }
                None => self.policy.poll_interval,
            };

            tokio::select! {
                _ = self.source.wait_for_data(stream, step) => {}
                _ = self.cancel.cancelled() => {
                    return Err(DeviceError::AcquisitionCancelled { stream: stream.index() });
                }
            }
        }
    }

    /// One frame from stream 0, then one from stream 1, placed per `mode`.
    pub async fn read_frames(&self, mode: ImageMode, images: &mut [ImageBuffer]) -> DeviceResult<[ReadOutcome; 2]> {
        check_layout(mode, images)?;

        match mode {
            ImageMode::Multi => {
                let (first, second) = images.split_at_mut(1);
                let a = self.read_frame(StreamId(0), first[0].pixels_mut()).await?;
                let b = self.read_frame(StreamId(1), second[0].pixels_mut()).await?;
                Ok([a, b])
            }
            ImageMode::Single => {
                let pixels = images[0].pixels_mut();
                let half = pixels.len() / 2;
                let (top, bottom) = pixels.split_at_mut(half);
                let a = self.read_frame(StreamId(0), top).await?;
                let b = self.read_frame(StreamId(1), bottom).await?;
                Ok([a, b])
            }
        }
    }
}

/// Reject image sets that do not match `mode`.
pub fn check_layout(mode: ImageMode, images: &[ImageBuffer]) -> DeviceResult<()> {
    let mismatch = || DeviceError::BufferLayoutMismatch {
        mode: mode.to_string(),
        expected: mode.image_count(),
        found: images.len(),
    };

    if images.len() != mode.image_count() {
        return Err(mismatch());
    }
    match mode {
        ImageMode::Multi => {
            let (a, b) = (&images[0], &images[1]);
            if (a.width(), a.height(), a.depth()) != (b.width(), b.height(), b.depth()) {
                return Err(mismatch());
            }
        }
        ImageMode::Single => {
            if images[0].height() % 2 != 0 {
                return Err(mismatch());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::frame::{MappedRegion, SampleType};
    use crate::components::source::{AcquisitionProperties, DeviceIdentifier, DeviceKind};
    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};
    use mmdev_core::DriverError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn record(frame_id: u64, payload: &[u8]) -> Bytes {
        FrameHeader {
            bytes_of_frame: 0,
            frame_id,
            hardware_frame_id: frame_id,
            timestamp_ns: 0,
            width: payload.len() as u32,
            height: 1,
            sample_type: SampleType::U8,
        }
        .encode(payload)
    }

    /// Source whose map results are scripted per stream; once a script runs
    /// out every map is empty.
    #[derive(Default)]
    struct ScriptedSource {
        scripts: Mutex<[VecDeque<Bytes>; 2]>,
        maps: Mutex<Vec<StreamId>>,
        unmaps: Mutex<Vec<(StreamId, usize)>>,
    }

    impl ScriptedSource {
        fn script(&self, stream: usize, spans: impl IntoIterator<Item = Bytes>) {
            self.scripts.lock()[stream].extend(spans);
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        fn devices(&self) -> Vec<DeviceIdentifier> {
            Vec::new()
        }
        fn select_device(&self, kind: DeviceKind, pattern: &str) -> Result<DeviceIdentifier, DriverError> {
            Ok(DeviceIdentifier {
                kind,
                id: 0,
                name: pattern.to_string(),
            })
        }
        fn get_configuration(&self) -> Result<AcquisitionProperties, DriverError> {
            Ok(AcquisitionProperties::default())
        }
        fn configure(&self, _properties: &mut AcquisitionProperties) -> Result<(), DriverError> {
            Ok(())
        }
        fn start(&self) -> Result<(), DriverError> {
            Ok(())
        }
        fn stop(&self) -> Result<(), DriverError> {
            Ok(())
        }
        fn map_read(&self, stream: StreamId) -> Result<MappedRegion, DriverError> {
            self.maps.lock().push(stream);
            let span = self.scripts.lock()[stream.index()]
                .pop_front()
                .unwrap_or_default();
            Ok(MappedRegion::new(stream, span))
        }
        fn unmap_read(&self, stream: StreamId, consumed: usize) -> Result<(), DriverError> {
            self.unmaps.lock().push((stream, consumed));
            Ok(())
        }
        fn shutdown(&self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn compositor(source: Arc<ScriptedSource>, timeout: Option<Duration>) -> FrameCompositor {
        FrameCompositor::new(
            source,
            WaitPolicy {
                poll_interval: Duration::from_millis(5),
                timeout,
            },
            CancelToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_polls_then_one_frame() {
        let source = Arc::new(ScriptedSource::default());
        source.script(
            0,
            [Bytes::new(), Bytes::new(), Bytes::new(), record(1, &[9, 8, 7, 6])],
        );

        let mut dest = [0u8; 4];
        let outcome = compositor(source.clone(), Some(Duration::from_secs(1)))
            .read_frame(StreamId(0), &mut dest)
            .await
            .unwrap();

        assert_eq!(dest, [9, 8, 7, 6]);
        assert_eq!(outcome.empty_polls, 3);
        assert_eq!(outcome.header.frame_id, 1);
        assert_eq!(source.maps.lock().len(), 4);
        assert_eq!(*source.unmaps.lock(), vec![(StreamId(0), 52)]);
    }

    #[tokio::test]
    async fn test_whole_span_released_with_several_frames() {
        let source = Arc::new(ScriptedSource::default());
        let mut span = BytesMut::new();
        span.extend_from_slice(&record(1, &[1; 4]));
        span.extend_from_slice(&record(2, &[2; 4]));
        span.extend_from_slice(&record(3, &[3; 4]));
        let span_len = span.len();
        source.script(0, [span.freeze()]);

        let mut dest = [0u8; 4];
        let outcome = compositor(source.clone(), None)
            .read_frame(StreamId(0), &mut dest)
            .await
            .unwrap();

        assert_eq!(dest, [1; 4]);
        assert_eq!(outcome.frames_in_span, 3);
        assert_eq!(outcome.released_bytes, span_len);
        assert_eq!(*source.unmaps.lock(), vec![(StreamId(0), span_len)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_stream_stays_empty() {
        let source = Arc::new(ScriptedSource::default());
        let mut dest = [0u8; 4];
        let err = compositor(source.clone(), Some(Duration::from_millis(50)))
            .read_frame(StreamId(1), &mut dest)
            .await
            .unwrap_err();

        match err {
            DeviceError::AcquisitionTimeout { stream, waited_ms } => {
                assert_eq!(stream, 1);
                assert!(waited_ms >= 50);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(source.unmaps.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let source = Arc::new(ScriptedSource::default());
        let compositor = compositor(source, None);
        let token = compositor.cancel_token().clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });

        let mut dest = [0u8; 4];
        let err = compositor.read_frame(StreamId(0), &mut dest).await.unwrap_err();
        assert!(matches!(err, DeviceError::AcquisitionCancelled { stream: 0 }));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let source = Arc::new(ScriptedSource::default());
        source.script(0, [record(1, &[5; 16])]);

        let mut dest = [0u8; 8];
        let err = compositor(source.clone(), None)
            .read_frame(StreamId(0), &mut dest)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeviceError::FrameTooLarge {
                stream: 0,
                bytes: 16,
                capacity: 8
            }
        ));
        assert_eq!(dest, [0; 8]);
        assert_eq!(*source.unmaps.lock(), vec![(StreamId(0), 0)]);
    }

    #[tokio::test]
    async fn test_malformed_record_is_released() {
        let source = Arc::new(ScriptedSource::default());
        source.script(1, [record(1, &[7; 8]).slice(0..20)]);

        let mut dest = [0u8; 8];
        let err = compositor(source.clone(), None)
            .read_frame(StreamId(1), &mut dest)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceError::Driver(_)));
        assert_eq!(*source.unmaps.lock(), vec![(StreamId(1), 0)]);
    }

    #[tokio::test]
    async fn test_single_mode_stacks_streams() {
        let source = Arc::new(ScriptedSource::default());
        source.script(0, [record(1, &[0xAA; 6])]);
        source.script(1, [record(1, &[0x55; 6])]);

        let mut images = allocate_images(ImageMode::Single, 3, 2, 1);
        compositor(source, None)
            .read_frames(ImageMode::Single, &mut images)
            .await
            .unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].rows(0, 2), &[0xAA; 6]);
        assert_eq!(images[0].rows(2, 4), &[0x55; 6]);
    }

    #[tokio::test]
    async fn test_multi_mode_one_image_per_stream() {
        let source = Arc::new(ScriptedSource::default());
        source.script(0, [record(1, &[1, 2, 3, 4])]);
        source.script(1, [record(1, &[5, 6, 7, 8])]);

        let mut images = allocate_images(ImageMode::Multi, 2, 2, 1);
        let [a, b] = compositor(source.clone(), None)
            .read_frames(ImageMode::Multi, &mut images)
            .await
            .unwrap();

        assert_eq!(images[0].pixels(), &[1, 2, 3, 4]);
        assert_eq!(images[1].pixels(), &[5, 6, 7, 8]);
        assert_eq!((a.stream, b.stream), (StreamId(0), StreamId(1)));
        assert_eq!(*source.maps.lock(), vec![StreamId(0), StreamId(1)]);
    }

    #[tokio::test]
    async fn test_layout_mismatch_rejected_before_reading() {
        let source = Arc::new(ScriptedSource::default());
        let mut images = allocate_images(ImageMode::Single, 4, 4, 1);
        let err = compositor(source.clone(), None)
            .read_frames(ImageMode::Multi, &mut images)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeviceError::BufferLayoutMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
        assert!(source.maps.lock().is_empty());
    }

    #[test]
    fn test_allocation_per_mode() {
        let multi = allocate_images(ImageMode::Multi, 640, 480, 1);
        assert_eq!(multi.len(), 2);
        assert!(multi.iter().all(|i| (i.width(), i.height()) == (640, 480)));

        let single = allocate_images(ImageMode::Single, 640, 480, 1);
        assert_eq!(single.len(), 1);
        assert_eq!((single[0].width(), single[0].height()), (640, 960));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Single".parse::<ImageMode>().unwrap(), ImageMode::Single);
        assert!("single".parse::<ImageMode>().is_err());
        assert_eq!(ImageMode::default().to_string(), "Multi");
    }
}
