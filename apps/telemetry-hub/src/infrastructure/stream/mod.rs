//! Telemetry Stream Adapter
//!
//! WebSocket connection lifecycle and frame decoding for the push path.

pub mod codec;
pub mod connection;

pub use codec::{CodecError, FrameCodec};
pub use connection::{ConnectionState, PumpReport, StreamConnection, StreamError};
