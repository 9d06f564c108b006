//! Device control session (`control/<deviceId>`)
//!
//! File management, print jobs, maintenance tasks and firmware updates on a
//! single machine. The session opens without auto-reconnect, sends the RSA
//! key as its first message and waits for the daemon to report `connected`.

use super::SessionContext;
use crate::protocol::channel::unexpected;
use crate::protocol::{
    upload, CommandChannel, Disposition, FrameInterceptor, Reply, Responses, UploadJob,
};
use ghostlink_core::data::frame::status;
use ghostlink_core::{
    ConnectionError, Frame, ProtocolError, Result, SessionObserver, StatusFrame,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Settle time between entering maintenance mode and the filament command
pub const MAINTAIN_SETTLE: Duration = Duration::from_secs(3);

/// Settle time between entering maintenance mode and `maintain headinfo`
pub const HEADINFO_SETTLE: Duration = Duration::from_secs(5);

/// Default extruder for filament operations
pub const DEFAULT_EXTRUDER: u32 = 0;

/// Default nozzle temperature for filament operations
pub const DEFAULT_TEMPERATURE: u32 = 220;

const FIRMWARE_MIME: &str = "binary/flux-firmware";
const TOOLHEAD_MIME: &str = "binary/fireware";
const MAINTAIN_TASK: &str = "maintain";

/// Filament maintenance operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilamentOperation {
    Load,
    Unload,
}

impl FilamentOperation {
    fn command(&self) -> &'static str {
        match self {
            FilamentOperation::Load => "load_filament",
            FilamentOperation::Unload => "unload_filament",
        }
    }
}

/// Result of `fileinfo`
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// File name that was queried
    pub name: String,
    /// Thumbnail, if the daemon sent one
    pub thumbnail: Option<Vec<u8>>,
    /// Info frames preceding the final `ok`
    pub info: Vec<StatusFrame>,
    /// The final `ok`
    pub result: StatusFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Pending,
    Connected,
    TimedOut,
    Closed,
}

/// Tracks the daemon's `connecting` / `connected` preamble
struct ConnectWatch {
    state: Arc<watch::Sender<LinkState>>,
    timeout: Duration,
    observer: Arc<dyn SessionObserver>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectWatch {
    fn new(timeout: Duration, observer: Arc<dyn SessionObserver>) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Pending);
        Arc::new(Self {
            state: Arc::new(state),
            timeout,
            observer,
            timer: Mutex::new(None),
        })
    }

    fn arm(&self) {
        let state = self.state.clone();
        let observer = self.observer.clone();
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let fired = state.send_if_modified(|s| {
                let pending = *s == LinkState::Pending;
                if pending {
                    *s = LinkState::TimedOut;
                }
                pending
            });
            if fired {
                tracing::warn!("Device link not established after {}ms", timeout.as_millis());
                observer.on_error(&StatusFrame::timeout());
            }
        });
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn disarm(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    async fn wait(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != LinkState::Pending)
            .await
            .map_err(|_| ConnectionError::ConnectionLost {
                reason: "control session dropped".to_string(),
            })?;
        match state {
            LinkState::Connected => Ok(()),
            LinkState::TimedOut => Err(ProtocolError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
            .into()),
            _ => Err(ConnectionError::Handshake {
                reason: "connection closed before the device connected".to_string(),
            }
            .into()),
        }
    }
}

impl FrameInterceptor for ConnectWatch {
    fn intercept(&self, reply: &Reply) -> Disposition {
        match reply {
            Reply::Message(Frame::Status(frame)) if frame.is(status::CONNECTING) => {
                self.observer.on_status(frame);
                self.arm();
                Disposition::Consume
            }
            Reply::Message(Frame::Status(frame)) if frame.is(status::CONNECTED) => {
                self.disarm();
                self.state.send_replace(LinkState::Connected);
                self.observer.on_status(frame);
                Disposition::Consume
            }
            Reply::Fatal(_) | Reply::Closed(_) => {
                self.disarm();
                self.state.send_if_modified(|s| {
                    let pending = *s == LinkState::Pending;
                    if pending {
                        *s = LinkState::Closed;
                    }
                    pending
                });
                Disposition::Forward
            }
            _ => Disposition::Forward,
        }
    }
}

/// Handle to a started print; interrupts are sent without claiming the
/// response slot
#[derive(Debug, Clone)]
pub struct PrintJob {
    channel: CommandChannel,
    started: StatusFrame,
}

impl PrintJob {
    /// Reply to `play start`
    pub fn started(&self) -> &StatusFrame {
        &self.started
    }

    /// Pause the running job
    pub fn pause(&self) {
        self.channel.send_raw("pause");
    }

    /// Resume a paused job
    pub fn resume(&self) {
        self.channel.send_raw("resume");
    }

    /// Abort the job
    pub fn abort(&self) {
        self.channel.send_raw("abort");
    }
}

/// Control session for one device
pub struct ControlSession {
    device_id: String,
    channel: CommandChannel,
    observer: Arc<dyn SessionObserver>,
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("device_id", &self.device_id)
            .field("channel", &self.channel)
            .finish()
    }
}

impl ControlSession {
    /// Open `control/<device_id>`, send the key and wait for `connected`
    pub async fn connect(ctx: &SessionContext, device_id: &str) -> Result<Self> {
        let key = ctx.key()?.to_string();
        let channel = ctx.open_channel(&format!("control/{}", device_id), Some(false))?;
        let link = ConnectWatch::new(ctx.config().protocol.readiness_timeout(), ctx.observer());
        channel.add_interceptor(link.clone());

        link.arm();
        channel.send_raw(key);
        if let Err(e) = link.wait().await {
            channel.transport().close(Some(false));
            return Err(e);
        }
        tracing::info!("Control session with {} established", device_id);

        Ok(Self {
            device_id: device_id.to_string(),
            channel,
            observer: ctx.observer(),
        })
    }

    /// Device this session controls
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Underlying command channel
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    async fn first(&self, command: String) -> Result<StatusFrame> {
        self.channel.invoke(command)?.next_status().await
    }

    /// `file ls <path>`
    pub async fn ls(&self, path: &str) -> Result<StatusFrame> {
        self.channel
            .invoke(format!("file ls {}", path))?
            .expect_status(&[status::OK])
            .await
    }

    /// `fileinfo <path>/<name>`
    pub async fn file_info(&self, path: &str, name: &str) -> Result<FileInfo> {
        let collected = self
            .channel
            .invoke(format!("fileinfo {}/{}", path, name))?
            .collect_until(&[status::OK])
            .await?;
        Ok(FileInfo {
            name: name.to_string(),
            thumbnail: collected.binary.into_iter().next(),
            info: collected.frames,
            result: collected.terminal,
        })
    }

    /// `select <path>`
    pub async fn select(&self, path: &str) -> Result<StatusFrame> {
        self.first(format!("select {}", path)).await
    }

    /// `file rmfile <path>`
    pub async fn delete_file(&self, path: &str) -> Result<StatusFrame> {
        self.first(format!("file rmfile {}", path)).await
    }

    /// `file download <path>`; `continue` frames are reported as status
    pub async fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut responses = self.channel.invoke(format!("file download {}", path))?;
        loop {
            match responses.next().await? {
                Frame::Binary(data) => return Ok(data),
                Frame::Status(frame) => self.observer.on_status(&frame),
                Frame::Text(text) => tracing::debug!("download ignoring {}", text),
            }
        }
    }

    /// `position`; resolves on the `position` frame
    pub async fn position(&self) -> Result<StatusFrame> {
        self.channel
            .invoke("position")?
            .expect_status(&["position"])
            .await
    }

    /// `report`
    pub async fn report(&self) -> Result<StatusFrame> {
        self.first("report".to_string()).await
    }

    /// `play start`
    pub async fn start(&self) -> Result<StatusFrame> {
        self.first("play start".to_string()).await
    }

    /// `pause`
    pub async fn pause(&self) -> Result<StatusFrame> {
        self.first("pause".to_string()).await
    }

    /// `resume`
    pub async fn resume(&self) -> Result<StatusFrame> {
        self.first("resume".to_string()).await
    }

    /// `abort`
    pub async fn abort(&self) -> Result<StatusFrame> {
        self.first("abort".to_string()).await
    }

    /// `kick`
    pub async fn kick(&self) -> Result<StatusFrame> {
        self.first("kick".to_string()).await
    }

    /// `task quit`
    pub async fn quit_task(&self) -> Result<StatusFrame> {
        self.first("task quit".to_string()).await
    }

    /// `play quit`; an `error` reply (nothing to quit) is returned as the
    /// answer
    pub async fn quit_play(&self) -> Result<StatusFrame> {
        self.channel.invoke("play quit")?.answer().await
    }

    /// `play info`; frames preceding the final `ok`
    pub async fn play_info(&self) -> Result<Vec<StatusFrame>> {
        let collected = self
            .channel
            .invoke("play info")?
            .collect_until(&[status::OK])
            .await?;
        Ok(collected.frames)
    }

    /// Upload `payload` and start printing it.
    ///
    /// A finished job still occupying the device is quit first.
    pub async fn print(&self, payload: &[u8]) -> Result<PrintJob> {
        let position = self.position().await?;
        if position.str_field("location") == Some("PlayTask") {
            let report = match self.channel.invoke("report")?.next_reply().await {
                Some(Reply::Message(Frame::Status(frame))) => frame.status().to_uppercase(),
                Some(Reply::Message(Frame::Text(text))) => text.to_uppercase(),
                Some(Reply::Message(Frame::Binary(_))) | Some(Reply::Error(_)) => {
                    status::ERROR.to_uppercase()
                }
                Some(Reply::Fatal(payload)) => return Err(ProtocolError::Fatal { payload }.into()),
                Some(Reply::Closed(code)) => return Err(ConnectionError::Closed { code }.into()),
                None => return Err(ProtocolError::Preempted.into()),
            };
            if report.starts_with("COMPLETED") {
                tracing::info!("Quitting completed job on {}", self.device_id);
                let quit = self.quit_play().await?;
                if quit.is(status::ERROR) {
                    tracing::warn!("play quit on {} answered {}", self.device_id, quit);
                }
            } else {
                tracing::debug!("Job on {} reports {}, uploading anyway", self.device_id, report);
            }
        }

        upload::upload(
            &self.channel,
            format!("upload application/fcode {}", payload.len()),
            UploadJob::chunked(payload),
            self.observer.as_ref(),
        )
        .await?;

        let started = self.start().await?;
        Ok(PrintJob {
            channel: self.channel.clone(),
            started,
        })
    }

    /// Store `payload` under `dir` without printing it.
    ///
    /// `.fc` files are stored as is, `.gcode` files are stored with an `.fc`
    /// extension; spaces in names become `_`.
    pub async fn upload_to_directory(
        &self,
        payload: &[u8],
        dir: &str,
        file_name: &str,
    ) -> Result<StatusFrame> {
        let name = file_name.replace(' ', "_");
        let command = match name.rsplit_once('.') {
            Some((_, "fc")) => format!(
                "upload application/fcode {} {}/{}",
                payload.len(),
                dir,
                name
            ),
            Some((stem, "gcode")) => format!(
                "upload text/gcode {} {}/{}.fc",
                payload.len(),
                dir,
                stem
            ),
            _ => {
                return Err(ConnectionError::InvalidParameters {
                    reason: format!("'{}' is neither .fc nor .gcode", file_name),
                }
                .into())
            }
        };

        upload::upload(
            &self.channel,
            command,
            UploadJob::chunked(payload),
            self.observer.as_ref(),
        )
        .await
    }

    async fn enter_maintenance(&self) -> Result<StatusFrame> {
        self.channel
            .invoke("task maintain")?
            .expect_status(&[status::OK])
            .await
    }

    /// Load or unload filament.
    ///
    /// `loading` / `unloading` frames are reported as status; any other
    /// frame ends the operation.
    pub async fn maintain(
        &self,
        operation: FilamentOperation,
        extruder: u32,
        temperature: u32,
    ) -> Result<StatusFrame> {
        self.enter_maintenance().await?;
        tokio::time::sleep(MAINTAIN_SETTLE).await;

        let mut responses = self.channel.invoke(format!(
            "maintain {} {} {}",
            operation.command(),
            extruder,
            temperature
        ))?;
        loop {
            let frame = responses.next_status().await?;
            match frame.status().to_lowercase().as_str() {
                "loading" | "unloading" => self.observer.on_status(&frame),
                _ => return Ok(frame),
            }
        }
    }

    /// Main firmware update: `update_fw binary/flux-firmware <size>`
    pub async fn update_firmware(&self, payload: &[u8]) -> Result<StatusFrame> {
        let responses = self
            .channel
            .invoke(format!("update_fw {} {}", FIRMWARE_MIME, payload.len()))?;
        self.stream_firmware(responses, payload, &["uploading"]).await
    }

    /// Toolhead firmware update through maintenance mode
    pub async fn update_toolhead(&self, payload: &[u8]) -> Result<StatusFrame> {
        let ok = self.enter_maintenance().await?;
        if ok.str_field("task") != Some(MAINTAIN_TASK) {
            return Ok(ok);
        }

        let responses = self.channel.invoke(format!(
            "maintain update_hbfw {} {}",
            TOOLHEAD_MIME,
            payload.len()
        ))?;
        self.stream_firmware(responses, payload, &["uploading", "update_hbfw"])
            .await
    }

    /// Single-shot payload exchange where unknown statuses are failures
    async fn stream_firmware(
        &self,
        mut responses: Responses,
        payload: &[u8],
        progress: &[&str],
    ) -> Result<StatusFrame> {
        let mut sent = false;
        loop {
            let frame = responses.next().await?;
            let Frame::Status(status_frame) = &frame else {
                return Err(unexpected(&frame));
            };
            match status_frame.status() {
                status::OK => return Ok(status_frame.clone()),
                status::CONTINUE => {
                    self.observer.on_status(status_frame);
                    if !sent {
                        self.channel.send_raw(payload);
                        sent = true;
                    }
                }
                s if progress.contains(&s) => self.observer.on_status(status_frame),
                _ => return Err(unexpected(&frame)),
            }
        }
    }

    /// Toolhead information, read in maintenance mode
    pub async fn head_info(&self) -> Result<StatusFrame> {
        let ok = self.enter_maintenance().await?;
        if ok.str_field("task") != Some(MAINTAIN_TASK) {
            return Ok(ok);
        }
        tokio::time::sleep(HEADINFO_SETTLE).await;

        let frame = self.first("maintain headinfo".to_string()).await?;
        if frame.is(status::OK) {
            Ok(frame)
        } else {
            Err(unexpected(&Frame::Status(frame)))
        }
    }

    /// Release the connection
    pub fn close(&self) {
        self.channel.transport().close(Some(false));
    }
}
