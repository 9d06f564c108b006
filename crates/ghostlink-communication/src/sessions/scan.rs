//! 3D scanner session (`3d-scan-control/<deviceId>`)
//!
//! Every command passes through a [`ReadinessGate`], so at most one command
//! is outstanding and nothing is sent before the scanner reports `ready`.
//! Operations on one session are additionally serialized so the gate and the
//! channel's response slot are always claimed in the same order.

use super::point_cloud::{ChunkAssembler, PointCloud};
use super::SessionContext;
use crate::protocol::{CommandChannel, ReadinessGate, Responses};
use ghostlink_core::data::frame::status;
use ghostlink_core::{
    ConnectionError, Frame, ProtocolError, Result, SessionObserver, StatusFrame,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Delay between two image requests of a running stream
pub const IMAGE_INTERVAL: Duration = Duration::from_millis(200);

/// Status reported to the observer once a scan completes
pub const FINISH: &str = "finish";

const BINARY: &str = "binary";
const CHUNK: &str = "chunk";
const STREAM_BUFFER: usize = 4;

/// One camera frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    /// MIME type announced by the `binary` status
    pub mime: String,
    pub data: Vec<u8>,
}

struct StreamControl {
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

struct Inner {
    device_id: String,
    channel: CommandChannel,
    gate: Arc<ReadinessGate>,
    observer: Arc<dyn SessionObserver>,
    commands: tokio::sync::Mutex<()>,
    stream: Mutex<Option<StreamControl>>,
    stop_scan: AtomicBool,
}

/// Live preview started by [`ScanSession::start_image_stream`].
///
/// Frames are dropped rather than queued when the consumer falls behind.
pub struct ImageStream {
    images: mpsc::Receiver<Result<CapturedImage>>,
    stop: Arc<watch::Sender<bool>>,
}

impl ImageStream {
    /// Next frame; `None` once the stream stopped
    pub async fn next(&mut self) -> Option<Result<CapturedImage>> {
        self.images.recv().await
    }

    /// Ask the stream to stop after the current capture
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// True once a stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

/// Scanner session for one device
#[derive(Clone)]
pub struct ScanSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("device_id", &self.inner.device_id)
            .field("gate", &self.inner.gate)
            .finish()
    }
}

impl ScanSession {
    /// Open `3d-scan-control/<device_id>` and send the key.
    ///
    /// Returns immediately; commands wait for the scanner to become ready.
    pub fn open(ctx: &SessionContext, device_id: &str) -> Result<Self> {
        let key = ctx.key()?.to_string();
        let channel =
            ctx.open_channel(&format!("3d-scan-control/{}", device_id), Some(false))?;
        let gate = ReadinessGate::attach(
            &channel,
            ctx.config().protocol.readiness_timeout(),
            ctx.observer(),
        );
        channel.send_raw(key);

        Ok(Self {
            inner: Arc::new(Inner {
                device_id: device_id.to_string(),
                channel,
                gate,
                observer: ctx.observer(),
                commands: tokio::sync::Mutex::new(()),
                stream: Mutex::new(None),
                stop_scan: AtomicBool::new(false),
            }),
        })
    }

    /// Device this session drives
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// The session's readiness gate
    pub fn gate(&self) -> &ReadinessGate {
        &self.inner.gate
    }

    /// Underlying command channel
    pub fn channel(&self) -> &CommandChannel {
        &self.inner.channel
    }

    /// Wait until the scanner reports `ready`
    pub async fn wait_ready(&self) -> Result<()> {
        self.inner.gate.wait_ready().await
    }

    /// Capture a single image
    pub async fn capture_image(&self) -> Result<CapturedImage> {
        self.inner.capture().await
    }

    /// Request images continuously, [`IMAGE_INTERVAL`] apart, until stopped.
    ///
    /// A stream that is already running is stopped first.
    pub async fn start_image_stream(&self) -> ImageStream {
        self.stop_image_stream().await;

        let (stop, mut stopped) = watch::channel(false);
        let stop = Arc::new(stop);
        let (tx, images) = mpsc::channel(STREAM_BUFFER);
        let inner = self.inner.clone();

        let task = tokio::spawn(async move {
            loop {
                if *stopped.borrow() {
                    break;
                }
                let result = inner.capture().await;
                let failed = result.is_err();
                match tx.try_send(result) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Image consumer behind, dropping frame")
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
                if failed {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(IMAGE_INTERVAL) => {}
                    _ = stopped.wait_for(|s| *s) => break,
                }
            }
            tracing::debug!("Image stream stopped");
        });

        *self.inner.stream.lock() = Some(StreamControl {
            stop: stop.clone(),
            task,
        });
        ImageStream { images, stop }
    }

    /// Stop the image stream and wait for its current capture to finish
    pub async fn stop_image_stream(&self) {
        let control = self.inner.stream.lock().take();
        if let Some(control) = control {
            control.stop.send_replace(true);
            if let Err(e) = control.task.await {
                tracing::warn!("Image stream task ended abnormally: {}", e);
            }
        }
    }

    /// Scan `resolution` times and return the assembled point cloud.
    ///
    /// Progress is reported once per completed cycle; the observer receives
    /// a [`FINISH`] status when the loop ends.
    pub async fn scan(&self, resolution: u32) -> Result<PointCloud> {
        if resolution == 0 {
            return Err(ConnectionError::InvalidParameters {
                reason: "scan resolution must be positive".to_string(),
            }
            .into());
        }
        self.stop_image_stream().await;

        let inner = &self.inner;
        let _guard = inner.commands.lock().await;
        inner.stop_scan.store(false, Ordering::SeqCst);

        let responses = inner
            .gate
            .send(&inner.channel, format!("resolution {}", resolution))
            .await?;
        terminal(responses).await?;

        let total = resolution as usize;
        let mut cloud = PointCloud::default();
        let mut assembler = ChunkAssembler::default();
        for cycle in 1..=total {
            let mut responses = inner.gate.send(&inner.channel, "scan").await?;
            loop {
                match responses.next().await? {
                    Frame::Binary(data) => assembler.push(&data, &mut cloud),
                    Frame::Status(frame) if frame.is(CHUNK) => {
                        let count = |key: &str| {
                            frame
                                .i64_field(key)
                                .and_then(|n| usize::try_from(n).ok())
                                .unwrap_or(0)
                        };
                        assembler.expect(count("left"), count("right"));
                    }
                    Frame::Status(frame) if frame.is(status::OK) => break,
                    Frame::Status(frame) if frame.is(status::FAIL) => {
                        return Err(ProtocolError::Failed { payload: frame }.into())
                    }
                    other => tracing::trace!("scan ignoring {}", other),
                }
            }
            drop(responses);
            inner.observer.on_progress(cycle, total);

            if inner.stop_scan.swap(false, Ordering::SeqCst) && cycle < total {
                tracing::info!("Scan stopped after {} of {} cycles", cycle, total);
                break;
            }
        }

        inner.observer.on_status(&StatusFrame::new(FINISH));
        tracing::info!("Scan finished with {} points", cloud.len());
        Ok(cloud)
    }

    /// Finish a running scan after its current cycle
    pub fn stop_scan(&self) {
        self.inner.stop_scan.store(true, Ordering::SeqCst);
    }

    /// `scan_check`; resolves with the first reply
    pub async fn scan_check(&self) -> Result<StatusFrame> {
        self.stop_image_stream().await;
        self.first("scan_check").await
    }

    /// `calibrate`; `continue` frames are progress, `fail` rejects
    pub async fn calibrate(&self) -> Result<StatusFrame> {
        self.stop_image_stream().await;
        let inner = &self.inner;
        let _guard = inner.commands.lock().await;
        let mut responses = inner.gate.send(&inner.channel, "calibrate").await?;
        loop {
            let frame = responses.next_status().await?;
            match frame.status() {
                status::CONTINUE => inner.observer.on_status(&frame),
                status::OK => return Ok(frame),
                status::FAIL => return Err(ProtocolError::Failed { payload: frame }.into()),
                _ => tracing::trace!("calibrate ignoring {}", frame),
            }
        }
    }

    /// `retry`; resolves with the first reply
    pub async fn retry(&self) -> Result<StatusFrame> {
        self.first("retry").await
    }

    /// `take_control`; resolves with the first reply
    pub async fn take_control(&self) -> Result<StatusFrame> {
        self.first("take_control").await
    }

    /// `quit`; an `error` reply also counts as an answer
    pub async fn quit(&self) -> Result<StatusFrame> {
        self.stop_image_stream().await;
        let inner = &self.inner;
        let _guard = inner.commands.lock().await;
        inner.gate.send(&inner.channel, "quit").await?.answer().await
    }

    /// Stop streaming and release the connection
    pub async fn close(&self) {
        self.stop_image_stream().await;
        self.inner.channel.transport().close(Some(false));
    }

    async fn first(&self, command: &str) -> Result<StatusFrame> {
        let inner = &self.inner;
        let _guard = inner.commands.lock().await;
        inner
            .gate
            .send(&inner.channel, command)
            .await?
            .next_status()
            .await
    }
}

impl Inner {
    async fn capture(&self) -> Result<CapturedImage> {
        let _guard = self.commands.lock().await;
        let mut responses = self.gate.send(&self.channel, "image").await?;
        let mut image = CapturedImage {
            mime: String::new(),
            data: Vec::new(),
        };
        loop {
            match responses.next().await? {
                Frame::Status(frame) if frame.is(BINARY) => {
                    image.mime = frame.str_field("mime").unwrap_or_default().to_string();
                    image.data.clear();
                }
                Frame::Binary(data) => image.data.extend_from_slice(&data),
                Frame::Status(frame) if frame.is(status::OK) => return Ok(image),
                Frame::Status(frame) if frame.is(status::FAIL) => {
                    return Err(ProtocolError::Failed { payload: frame }.into())
                }
                other => tracing::trace!("image ignoring {}", other),
            }
        }
    }
}

/// Wait for `ok`; `fail` rejects
async fn terminal(mut responses: Responses) -> Result<StatusFrame> {
    loop {
        let frame = responses.next_status().await?;
        match frame.status() {
            status::OK => return Ok(frame),
            status::FAIL => return Err(ProtocolError::Failed { payload: frame }.into()),
            _ => tracing::trace!("'{}' skipping {}", responses.command(), frame),
        }
    }
}
