use grainrpc_frame::{Frame, MessageKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::error::{CallResult, EndpointError, Result, RpcError};
use crate::ids::{GrainId, RpcId};

/// A method invocation sent to the grain `grain_id` of the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub rpc_id: RpcId,
    pub grain_id: GrainId,
    pub interface: String,
    pub method: String,
    pub args: Vec<Value>,
    /// No result is sent back for one-way invocations.
    #[serde(default)]
    pub one_way: bool,
}

/// The answer to an [`Invocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResult {
    pub rpc_id: RpcId,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Return(Value),
    Exception(Value),
}

impl Outcome {
    pub fn from_result(result: CallResult<Value>) -> Self {
        match result {
            Ok(value) => Outcome::Return(value),
            Err(err) => Outcome::Exception(codec::exception_to_value(&err)),
        }
    }

    pub fn into_result(self) -> CallResult<Value> {
        match self {
            Outcome::Return(value) => Ok(value),
            Outcome::Exception(record) => Err(codec::exception_from_value(record)),
        }
    }
}

/// Proxies the sender no longer uses. The receiver may drop the matching
/// implicit servants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub grains: Vec<ReleasedGrain>,
}

/// One collected proxy and the number of references to its grain the
/// sender received while the proxy was alive.
///
/// The receiver keeps the servant if it handed out more references than
/// that, since those are still in flight towards the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedGrain {
    pub grain_id: GrainId,
    pub references: u64,
}

/// Every message exchanged after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Invocation),
    Result(MethodResult),
    Goodbye,
    Release(Release),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Call(_) => MessageKind::Call,
            Message::Result(_) => MessageKind::Result,
            Message::Goodbye => MessageKind::Goodbye,
            Message::Release(_) => MessageKind::Release,
        }
    }

    pub fn encode(&self) -> Result<Frame> {
        let mut payload = Vec::new();
        let written = match self {
            Message::Call(invocation) => codec::write_value(&mut payload, invocation),
            Message::Result(result) => codec::write_value(&mut payload, result),
            Message::Goodbye => Ok(()),
            Message::Release(release) => codec::write_value(&mut payload, release),
        };
        written.map_err(EndpointError::Marshal)?;
        Ok(Frame::new(self.kind(), payload))
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload[..];
        let message = match frame.kind {
            MessageKind::Call => Message::Call(read(payload)?),
            MessageKind::Result => Message::Result(read(payload)?),
            MessageKind::Goodbye => Message::Goodbye,
            MessageKind::Release => Message::Release(read(payload)?),
            MessageKind::Handshake => {
                return Err(EndpointError::Handshake(
                    "unexpected handshake message on an established connection".to_string(),
                ))
            }
        };
        Ok(message)
    }
}

fn read<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T> {
    codec::read_value(payload).map_err(EndpointError::Marshal)
}

impl From<RpcError> for Outcome {
    fn from(err: RpcError) -> Self {
        Outcome::from_result(Err(err))
    }
}
