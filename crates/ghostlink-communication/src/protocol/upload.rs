//! Chunked upload sub-protocol
//!
//! The client announces a payload with a command such as
//! `upload <name> <size>`. The server answers `continue` when it wants the
//! bytes, then `ok` once it has them all, or `error`. One `continue` triggers
//! the whole payload as a burst of [`CHUNK_SIZE`] binary frames; nothing is
//! acknowledged or retransmitted per chunk.

use super::channel::{CommandChannel, Responses};
use ghostlink_core::data::frame::status;
use ghostlink_core::{Frame, Result, SessionObserver, StatusFrame};

/// Size of one binary upload frame
pub const CHUNK_SIZE: usize = 4096;

/// Frames needed for `size` bytes
pub fn chunk_count(size: usize) -> usize {
    size.div_ceil(CHUNK_SIZE)
}

/// How the payload is cut into frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// [`CHUNK_SIZE`] frames in offset order
    Chunked,
    /// The whole payload as one frame (preview images, firmware)
    SingleShot,
}

/// One payload waiting for the server's `continue`
#[derive(Debug, Clone)]
pub struct UploadJob<'a> {
    payload: &'a [u8],
    mode: PayloadMode,
    sent: bool,
}

impl<'a> UploadJob<'a> {
    /// Payload sent in [`CHUNK_SIZE`] pieces
    pub fn chunked(payload: &'a [u8]) -> Self {
        Self {
            payload,
            mode: PayloadMode::Chunked,
            sent: false,
        }
    }

    /// Payload sent as a single frame
    pub fn single_shot(payload: &'a [u8]) -> Self {
        Self {
            payload,
            mode: PayloadMode::SingleShot,
            sent: false,
        }
    }

    /// Total payload size in bytes
    pub fn total_size(&self) -> usize {
        self.payload.len()
    }

    /// Cutting mode
    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    /// Number of frames the payload is sent as
    pub fn total_chunks(&self) -> usize {
        match self.mode {
            PayloadMode::Chunked => chunk_count(self.payload.len()),
            PayloadMode::SingleShot => 1,
        }
    }

    /// Frames in send order
    pub fn pieces(&self) -> Vec<&'a [u8]> {
        match self.mode {
            PayloadMode::Chunked => self.payload.chunks(CHUNK_SIZE).collect(),
            PayloadMode::SingleShot => vec![self.payload],
        }
    }

    /// True once the payload went out
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Send every piece back to back, reporting `(sent, total)` after each
    fn burst(&mut self, channel: &CommandChannel, observer: &dyn SessionObserver) {
        let pieces = self.pieces();
        let total = pieces.len();
        for (index, piece) in pieces.into_iter().enumerate() {
            channel.send_raw(piece);
            observer.on_progress(index + 1, total);
        }
        self.sent = true;
        tracing::debug!("Sent {} bytes in {} frame(s)", self.payload.len(), total);
    }
}

/// Announce with `command` and stream `job` when the server asks for it.
///
/// Resolves with the server's `ok` frame. Intermediate statuses go to
/// `observer.on_status`.
pub async fn upload(
    channel: &CommandChannel,
    command: impl Into<String>,
    job: UploadJob<'_>,
    observer: &dyn SessionObserver,
) -> Result<StatusFrame> {
    let responses = channel.invoke(command)?;
    drive(channel, responses, job, observer).await
}

/// Run the upload exchange on an invocation that is already in flight
pub async fn drive(
    channel: &CommandChannel,
    mut responses: Responses,
    mut job: UploadJob<'_>,
    observer: &dyn SessionObserver,
) -> Result<StatusFrame> {
    loop {
        match responses.next().await? {
            Frame::Status(frame) if frame.is(status::CONTINUE) => {
                if job.is_sent() {
                    tracing::warn!(
                        "'{}': server asked for the payload again, chunks are not retransmitted",
                        responses.command()
                    );
                    observer.on_status(&frame);
                } else {
                    job.burst(channel, observer);
                }
            }
            Frame::Status(frame) if frame.is(status::OK) => return Ok(frame),
            Frame::Status(frame) => observer.on_status(&frame),
            other => tracing::debug!("'{}' ignoring {}", responses.command(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(4096), 1);
        assert_eq!(chunk_count(4097), 2);
        assert_eq!(chunk_count(10_000), 3);
    }

    #[test]
    fn test_ten_thousand_bytes() {
        let payload = vec![0xAB; 10_000];
        let job = UploadJob::chunked(&payload);
        let sizes: Vec<usize> = job.pieces().iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);
    }

    #[test]
    fn test_single_shot_is_one_frame() {
        let payload = vec![1u8; 9000];
        let job = UploadJob::single_shot(&payload);
        assert_eq!(job.total_chunks(), 1);
        assert_eq!(job.pieces(), vec![payload.as_slice()]);
    }

    proptest! {
        #[test]
        fn prop_chunks_reassemble(payload in proptest::collection::vec(any::<u8>(), 0..20_000)) {
            let job = UploadJob::chunked(&payload);
            let pieces = job.pieces();

            prop_assert_eq!(pieces.len(), payload.len().div_ceil(CHUNK_SIZE));
            prop_assert_eq!(pieces.len(), job.total_chunks());

            let mut offset = 0;
            for piece in &pieces {
                prop_assert!(!piece.is_empty() && piece.len() <= CHUNK_SIZE);
                prop_assert_eq!(*piece, &payload[offset..offset + piece.len()]);
                offset += piece.len();
            }
            prop_assert_eq!(offset, payload.len());
            prop_assert_eq!(pieces.concat(), payload);
        }
    }
}
