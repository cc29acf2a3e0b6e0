//! Length-prefixed message framing for grainrpc.
//!
//! Every message on an endpoint connection is framed with:
//! - A 2-byte magic number ("GR") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 1-byte [`MessageKind`] discriminator
//! - A 1-byte flags field (reserved, zero)
//!
//! A reader therefore knows from the header alone whether it is looking at
//! a handshake step, a method invocation, a method result, or a control
//! notice, before touching the payload.

pub mod codec;
pub mod error;
pub mod kind;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use kind::MessageKind;
pub use reader::FrameReader;
pub use writer::FrameWriter;
