//! Remote procedure calls between clients and servers of one function.
//!
//! Calls and responses travel as [`RpcRequest`]s between controllers. What
//! handlers see are the [`RpcEvent`]s the controllers derive from them.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::ids::ControllerDescriptor;

/// Identifies one call: the calling client and its call counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RpcCallHandle {
    /// Client that issued the call
    pub caller: ControllerDescriptor,
    /// Per-client call counter
    pub call: u64,
}

impl fmt::Display for RpcCallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call {} of {}", self.call, self.caller)
    }
}

/// Outcome of a call as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcCallStatus {
    /// A server answered
    Success,
    /// No server for the function was known when the call was made
    ServerNotReachable,
    /// The server reported an error it could not describe
    UndefinedError,
    /// The server failed while handling the call
    InternalServerError,
    /// No answer arrived in time
    Timeout,
}

/// Wire messages between RPC controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    /// A server exists for the function
    ServerAnnounced,
    /// A client calls every server of the function
    Call(RpcFunctionCall),
    /// A server answers one call
    Response(RpcFunctionCallResponse),
}

/// Call as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFunctionCall {
    /// Simulation time of the call
    pub timestamp: Duration,
    /// Client-local call counter
    pub call: u64,
    /// Serialized arguments
    pub argument_data: Vec<u8>,
}

/// Answer as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFunctionCallResponse {
    /// Simulation time of the answer
    pub timestamp: Duration,
    /// The call being answered
    pub call_handle: RpcCallHandle,
    /// `Success` or a server-side error
    pub status: RpcCallStatus,
    /// Serialized result
    pub result_data: Vec<u8>,
}

/// A call arriving at a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcCallEvent {
    /// Simulation time of the call
    pub timestamp: Duration,
    /// Handle to answer with
    pub call_handle: RpcCallHandle,
    /// Serialized arguments
    pub argument_data: Vec<u8>,
}

/// The result of a call arriving at its client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcCallResultEvent {
    /// Simulation time of the answer
    pub timestamp: Duration,
    /// Opaque value passed to the call
    pub user_context: Option<u64>,
    /// Outcome
    pub status: RpcCallStatus,
    /// Serialized result, empty unless `status` is `Success`
    pub result_data: Vec<u8>,
}

/// Events raised by RPC controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcEvent {
    /// Server side: a client called
    Call(RpcCallEvent),
    /// Client side: a call completed
    CallResult(RpcCallResultEvent),
}

impl RpcEvent {
    /// Simulation time carried by the event.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        match self {
            Self::Call(e) => e.timestamp,
            Self::CallResult(e) => e.timestamp,
        }
    }
}
