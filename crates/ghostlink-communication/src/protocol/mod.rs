//! Command sequencing on top of the transport
//!
//! - [`channel`]: single-slot request/response correlation
//! - [`upload`]: `continue`-driven binary uploads
//! - [`readiness`]: `ready` gating for session endpoints

pub mod channel;
pub mod readiness;
pub mod upload;

pub use channel::{
    ChannelPolicy, Collected, CommandChannel, Disposition, FrameInterceptor, Reply, Responses,
};
pub use readiness::{GateState, ReadinessGate};
pub use upload::{chunk_count, PayloadMode, UploadJob, CHUNK_SIZE};
