//! Slicing session (`3dprint-slicing`)
//!
//! Models are uploaded, positioned and sliced server side; `go` streams
//! progress frames and ends with the generated G-code or F-code as a binary
//! frame.

use super::SessionContext;
use crate::protocol::channel::unexpected;
use crate::protocol::{upload, CommandChannel, Reply, Responses, UploadJob};
use ghostlink_core::data::frame::status;
use ghostlink_core::{
    ConnectionError, Frame, ProtocolError, Result, SessionObserver, StatusFrame,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Parameter name routed to `advanced_setting`
pub const ADVANCED_SETTINGS: &str = "advancedSettings";

const WARNING: &str = "warning";
const COMPLETE: &str = "complete";

/// Output of `go`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    GCode,
    #[default]
    FCode,
}

impl OutputFormat {
    fn flag(&self) -> &'static str {
        match self {
            OutputFormat::GCode => "-g",
            OutputFormat::FCode => "-f",
        }
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::GCode => "gcode",
            OutputFormat::FCode => "fc",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::GCode => write!(f, "G-code"),
            OutputFormat::FCode => write!(f, "F-code"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "g" | "gcode" => Ok(OutputFormat::GCode),
            "f" | "fc" | "fcode" => Ok(OutputFormat::FCode),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Placement of one object on the build plate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectTransform {
    pub position: [f64; 3],
    pub rotation: [f64; 3],
    pub scale: [f64; 3],
}

impl Default for ObjectTransform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl ObjectTransform {
    fn arguments(&self) -> String {
        self.position
            .iter()
            .chain(&self.rotation)
            .chain(&self.scale)
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An uploaded model and its placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    #[serde(default)]
    pub transform: ObjectTransform,
}

/// Result of a parameter change
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterResult {
    pub result: StatusFrame,
    /// `error` frames the server sent before the result
    pub warnings: Vec<String>,
}

/// Sliced output
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub data: Vec<u8>,
    pub format: OutputFormat,
    /// Messages of `warning` frames seen while slicing
    pub warnings: Vec<String>,
}

/// Session with the slicing service
pub struct SlicingSession {
    channel: CommandChannel,
    observer: Arc<dyn SessionObserver>,
}

impl fmt::Debug for SlicingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlicingSession")
            .field("channel", &self.channel)
            .finish()
    }
}

impl SlicingSession {
    /// Open `3dprint-slicing`
    pub fn open(ctx: &SessionContext) -> Result<Self> {
        Ok(Self {
            channel: ctx.open_channel("3dprint-slicing", None)?,
            observer: ctx.observer(),
        })
    }

    /// Underlying command channel
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Upload a model under `name`
    pub async fn upload(&self, name: &str, model: &[u8]) -> Result<StatusFrame> {
        upload::upload(
            &self.channel,
            format!("upload {} {}", name, model.len()),
            UploadJob::chunked(model),
            self.observer.as_ref(),
        )
        .await
    }

    /// Place an uploaded object
    pub async fn set(&self, name: &str, transform: &ObjectTransform) -> Result<StatusFrame> {
        self.channel
            .invoke(format!("set {} {}", name, transform.arguments()))?
            .next_status()
            .await
    }

    /// Remove an object; an `error` reply is returned as the answer
    pub async fn delete(&self, name: &str) -> Result<StatusFrame> {
        self.channel.invoke(format!("delete {}", name))?.answer().await
    }

    /// Copy an object; `error` and `fatal` replies are returned as the answer
    pub async fn duplicate(&self, old_name: &str, new_name: &str) -> Result<StatusFrame> {
        let responses = self
            .channel
            .invoke(format!("duplicate {} {}", old_name, new_name))?;
        answer_or_fatal(responses).await
    }

    /// Change a slicing parameter.
    ///
    /// A non-empty [`ADVANCED_SETTINGS`] value is sent as `advanced_setting`.
    pub async fn set_parameter(&self, name: &str, value: &str) -> Result<ParameterResult> {
        let command = if name == ADVANCED_SETTINGS && !value.is_empty() {
            format!("advanced_setting {}", value)
        } else {
            format!("set_params {} {}", name, value)
        };

        let mut responses = self.channel.invoke(command)?;
        let mut warnings = Vec::new();
        loop {
            match responses.next_reply().await {
                Some(Reply::Message(Frame::Status(result))) => {
                    return Ok(ParameterResult { result, warnings })
                }
                Some(Reply::Message(other)) => {
                    tracing::debug!("set_params ignoring {}", other)
                }
                Some(Reply::Error(payload)) => {
                    let warning = payload.message().unwrap_or_default().to_string();
                    tracing::warn!("Parameter '{}': {}", name, warning);
                    warnings.push(warning);
                }
                Some(Reply::Fatal(payload)) => {
                    return Err(ProtocolError::Fatal { payload }.into())
                }
                Some(Reply::Closed(code)) => return Err(ConnectionError::Closed { code }.into()),
                None => return Err(ProtocolError::Preempted.into()),
            }
        }
    }

    /// Upload the preview image embedded into F-code
    pub async fn upload_preview(&self, image: &[u8]) -> Result<StatusFrame> {
        upload::upload(
            &self.channel,
            format!("upload_image {}", image.len()),
            UploadJob::single_shot(image),
            self.observer.as_ref(),
        )
        .await
    }

    /// `get_path`
    pub async fn get_path(&self) -> Result<StatusFrame> {
        self.channel.invoke("get_path")?.next_status().await
    }

    /// `position`, the slicer's current state
    pub async fn position(&self) -> Result<StatusFrame> {
        self.channel.invoke("position")?.next_status().await
    }

    /// Stop slicing; an `error` reply is returned as the answer
    pub async fn stop(&self) -> Result<StatusFrame> {
        self.channel.invoke("stop")?.answer().await
    }

    /// Slice `names` and wait for the generated file.
    ///
    /// Progress frames are reported to the observer; `percentage` is a
    /// fraction of one and is reported as `(percent, 100)`.
    pub async fn generate(&self, names: &[&str], format: OutputFormat) -> Result<Artifact> {
        if names.is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "nothing to slice".to_string(),
            }
            .into());
        }

        let mut responses = self
            .channel
            .invoke(format!("go {} {}", names.join(" "), format.flag()))?;
        let mut warnings = Vec::new();
        loop {
            match responses.next().await? {
                Frame::Binary(data) => {
                    tracing::info!("Received {} bytes of {}", data.len(), format);
                    return Ok(Artifact {
                        data,
                        format,
                        warnings,
                    });
                }
                Frame::Status(frame) if frame.is(WARNING) => {
                    warnings.push(frame.message().unwrap_or_default().to_string());
                    self.observer.on_status(&frame);
                }
                Frame::Status(frame) => {
                    let percent = if frame.is(COMPLETE) {
                        100
                    } else {
                        (frame.f64_field("percentage").unwrap_or(0.0) * 100.0) as usize
                    };
                    self.observer.on_progress(percent.min(100), 100);
                    self.observer.on_status(&frame);
                }
                Frame::Text(text) => tracing::debug!("go ignoring {}", text),
            }
        }
    }

    /// Full render: preview, parameters, placement of every object, then `go`.
    ///
    /// Stops at the first object whose `set` is rejected.
    pub async fn render(
        &self,
        objects: &[SceneObject],
        preview: Option<&[u8]>,
        parameters: &[(String, String)],
        format: OutputFormat,
    ) -> Result<Artifact> {
        if let Some(image) = preview {
            let reply = self.upload_preview(image).await?;
            if !reply.is(status::OK) {
                return Err(unexpected(&Frame::Status(reply)));
            }
        }

        for (name, value) in parameters {
            self.set_parameter(name, value).await?;
        }

        for object in objects {
            self.set(&object.name, &object.transform).await?;
        }

        let names: Vec<&str> = objects.iter().map(|o| o.name.as_str()).collect();
        self.generate(&names, format).await
    }

    /// Release the connection
    pub fn close(&self) {
        self.channel.transport().close(Some(false));
    }
}

/// Like [`Responses::answer`], but a `fatal` reply is an answer too
async fn answer_or_fatal(mut responses: Responses) -> Result<StatusFrame> {
    match responses.next_reply().await {
        Some(Reply::Fatal(payload)) => Ok(payload),
        Some(Reply::Message(Frame::Status(frame))) | Some(Reply::Error(frame)) => Ok(frame),
        Some(Reply::Message(other)) => Err(unexpected(&other)),
        Some(Reply::Closed(code)) => Err(ConnectionError::Closed { code }.into()),
        None => Err(ProtocolError::Preempted.into()),
    }
}
