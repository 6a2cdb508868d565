//! Remote procedure call clients and servers.
//!
//! The network of an RPC controller is its function name. A server announces
//! itself to every controller on the function; a client calls all servers it
//! knows and receives one result per answering server. Calls made while no
//! server is known complete at once with
//! [`RpcCallStatus::ServerNotReachable`].
//!
//! Answers are sent to the calling client only, but on the receiving
//! participant they reach every controller of the function, so clients
//! discard answers addressed to another caller.

use std::collections::{BTreeMap, BTreeSet};

use cosim_proto::{
    ControllerDescriptor, ControllerInfo, NetworkEvent, NetworkRequest, PeerPayload,
    payloads::rpc::{
        RpcCallEvent, RpcCallHandle, RpcCallResultEvent, RpcCallStatus, RpcEvent,
        RpcFunctionCall, RpcFunctionCallResponse, RpcRequest,
    },
};

use super::{ControllerAction, NetworkContext};
use crate::{error::ControllerError, log::LogRecord};

/// Whether the controller calls or serves the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcRole {
    /// Calls the function
    Client,
    /// Answers calls
    Server,
}

#[derive(Debug, Clone)]
struct PendingCall {
    user_context: Option<u64>,
    remaining: usize,
}

/// An RPC client or server.
#[derive(Debug, Clone)]
pub struct RpcController {
    function: String,
    role: RpcRole,
    /// Client: servers of the function
    servers: BTreeSet<ControllerDescriptor>,
    /// Client: calls still waiting for answers
    calls: BTreeMap<u64, PendingCall>,
    next_call: u64,
    /// Server: calls not answered yet
    received: BTreeSet<RpcCallHandle>,
}

impl RpcController {
    /// Client of `function`.
    pub fn client(function: impl Into<String>) -> Self {
        Self::new(function.into(), RpcRole::Client)
    }

    /// Server of `function`.
    pub fn server(function: impl Into<String>) -> Self {
        Self::new(function.into(), RpcRole::Server)
    }

    fn new(function: String, role: RpcRole) -> Self {
        Self {
            function,
            role,
            servers: BTreeSet::new(),
            calls: BTreeMap::new(),
            next_call: 0,
            received: BTreeSet::new(),
        }
    }

    /// Function name.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Role.
    pub fn role(&self) -> RpcRole {
        self.role
    }

    /// Servers a client currently knows.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Calls a server received and has not answered.
    pub fn open_calls(&self) -> impl Iterator<Item = RpcCallHandle> + '_ {
        self.received.iter().copied()
    }

    /// Tell the controllers of the function that this server exists.
    pub fn announce(&self) -> Vec<ControllerAction> {
        if self.role != RpcRole::Server {
            return Vec::new();
        }
        vec![ControllerAction::Broadcast(server_announced())]
    }

    /// Call every known server with `argument_data`.
    pub fn call(
        &mut self,
        argument_data: Vec<u8>,
        user_context: Option<u64>,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        if self.role != RpcRole::Client {
            return vec![self.warn("servers cannot call".to_string())];
        }
        if self.servers.is_empty() {
            return vec![ControllerAction::Deliver(NetworkEvent::Rpc(RpcEvent::CallResult(
                RpcCallResultEvent {
                    timestamp: ctx.now,
                    user_context,
                    status: RpcCallStatus::ServerNotReachable,
                    result_data: Vec::new(),
                },
            )))];
        }

        let call = self.next_call;
        self.next_call += 1;
        self.calls.insert(call, PendingCall { user_context, remaining: self.servers.len() });
        vec![ControllerAction::Broadcast(PeerPayload::Request(NetworkRequest::Rpc(
            RpcRequest::Call(RpcFunctionCall { timestamp: ctx.now, call, argument_data }),
        )))]
    }

    /// Answer a received call.
    ///
    /// # Errors
    ///
    /// - `ControllerError::UnknownCall` if `call_handle` was not received or
    ///   was already answered
    pub fn submit_result(
        &mut self,
        call_handle: RpcCallHandle,
        result_data: Vec<u8>,
        ctx: NetworkContext,
    ) -> Result<Vec<ControllerAction>, ControllerError> {
        self.respond(call_handle, RpcCallStatus::Success, result_data, ctx)
    }

    /// Report that handling a received call failed.
    ///
    /// # Errors
    ///
    /// As for [`Self::submit_result`].
    pub fn submit_error(
        &mut self,
        call_handle: RpcCallHandle,
        ctx: NetworkContext,
    ) -> Result<Vec<ControllerAction>, ControllerError> {
        self.respond(call_handle, RpcCallStatus::InternalServerError, Vec::new(), ctx)
    }

    fn respond(
        &mut self,
        call_handle: RpcCallHandle,
        status: RpcCallStatus,
        result_data: Vec<u8>,
        ctx: NetworkContext,
    ) -> Result<Vec<ControllerAction>, ControllerError> {
        if !self.received.remove(&call_handle) {
            return Err(ControllerError::UnknownCall {
                controller: self.function.clone(),
                call: call_handle,
            });
        }
        Ok(vec![ControllerAction::SendTo {
            to: call_handle.caller,
            payload: PeerPayload::Request(NetworkRequest::Rpc(RpcRequest::Response(
                RpcFunctionCallResponse { timestamp: ctx.now, call_handle, status, result_data },
            ))),
        }])
    }

    pub(super) fn on_peer(
        &mut self,
        me: ControllerDescriptor,
        from: ControllerDescriptor,
        payload: &PeerPayload,
    ) -> Vec<ControllerAction> {
        let PeerPayload::Request(NetworkRequest::Rpc(request)) = payload else {
            return Vec::new();
        };
        match (self.role, request) {
            (RpcRole::Client, RpcRequest::ServerAnnounced) => {
                self.servers.insert(from);
                Vec::new()
            },
            (RpcRole::Server, RpcRequest::Call(call)) => {
                let call_handle = RpcCallHandle { caller: from, call: call.call };
                self.received.insert(call_handle);
                vec![ControllerAction::Deliver(NetworkEvent::Rpc(RpcEvent::Call(RpcCallEvent {
                    timestamp: call.timestamp,
                    call_handle,
                    argument_data: call.argument_data.clone(),
                })))]
            },
            (RpcRole::Client, RpcRequest::Response(response))
                if response.call_handle.caller == me =>
            {
                self.on_response(response)
            },
            _ => Vec::new(),
        }
    }

    fn on_response(&mut self, response: &RpcFunctionCallResponse) -> Vec<ControllerAction> {
        let call = response.call_handle.call;
        let Some(pending) = self.calls.get_mut(&call) else {
            return vec![self.warn(format!("dropping answer to unknown call {call}"))];
        };
        let user_context = pending.user_context;
        pending.remaining = pending.remaining.saturating_sub(1);
        if pending.remaining == 0 {
            self.calls.remove(&call);
        }
        vec![ControllerAction::Deliver(NetworkEvent::Rpc(RpcEvent::CallResult(
            RpcCallResultEvent {
                timestamp: response.timestamp,
                user_context,
                status: response.status,
                result_data: response.result_data.clone(),
            },
        )))]
    }

    /// A controller joined the function. Servers introduce themselves.
    pub(super) fn on_peer_announced(&self, info: &ControllerInfo) -> Vec<ControllerAction> {
        if self.role != RpcRole::Server {
            return Vec::new();
        }
        vec![ControllerAction::SendTo { to: info.descriptor, payload: server_announced() }]
    }

    /// A controller left the function.
    pub(super) fn on_peer_removed(&mut self, descriptor: ControllerDescriptor) {
        self.servers.remove(&descriptor);
        self.received.retain(|handle| handle.caller != descriptor);
    }

    fn warn(&self, message: String) -> ControllerAction {
        ControllerAction::Log(LogRecord::warn(format!("RPC '{}': {message}", self.function)))
    }
}

fn server_announced() -> PeerPayload {
    PeerPayload::Request(NetworkRequest::Rpc(RpcRequest::ServerAnnounced))
}
