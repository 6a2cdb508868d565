//! LIN controller.
//!
//! Every controller keeps a table of the LIN nodes on its network: its own
//! node plus one entry per peer, holding the peer's mode, status and frame
//! responses. On a trivial network slaves share their configuration and
//! response updates with everybody, which lets a master decide locally
//! whether exactly one node will answer a header.
//!
//! A trivial frame transmission travels as a frame status event carrying an
//! `Rx` status. Each receiver derives its own status from its response
//! table, so the sender sees `LIN_TX_OK` while a configured receiver sees
//! `LIN_RX_OK`.

use std::collections::{BTreeMap, BTreeSet};

use cosim_proto::{
    ControllerDescriptor, ControllerInfo, NetworkEvent, NetworkRequest, PeerPayload,
    TransmitDirection,
    payloads::lin::{
        DATA_LENGTH_UNKNOWN, LinChecksumModel, LinControllerConfig, LinControllerMode,
        LinControllerStatus, LinEvent, LinFrame, LinFrameHeaderEvent, LinFrameResponse,
        LinFrameResponseMode, LinFrameResponseType, LinFrameStatus, LinFrameStatusEvent,
        LinGoToSleepEvent, LinId, LinRequest, LinSendFrameHeaderRequest, LinSendFrameRequest,
        LinSimulationMode, LinWakeupEvent, LinWakeupPulse, MAX_LIN_ID,
    },
};

use super::{ControllerAction, NetworkContext};
use crate::{error::ControllerError, log::LogRecord};

const MAX_DATA_LENGTH: u8 = 8;

type LinResult = Result<Vec<ControllerAction>, ControllerError>;

#[derive(Debug, Clone)]
struct LinNode {
    mode: LinControllerMode,
    status: LinControllerStatus,
    simulation_mode: LinSimulationMode,
    responses: Vec<LinFrameResponse>,
}

impl LinNode {
    fn new() -> Self {
        Self {
            mode: LinControllerMode::Inactive,
            status: LinControllerStatus::Unknown,
            simulation_mode: LinSimulationMode::Default,
            responses: (0..64u8)
                .map(|id| LinFrameResponse {
                    frame: LinFrame::empty(id),
                    mode: LinFrameResponseMode::Unused,
                })
                .collect(),
        }
    }

    fn response(&self, id: LinId) -> Option<&LinFrameResponse> {
        self.responses.get(usize::from(id))
    }

    fn response_mode(&self, id: LinId) -> LinFrameResponseMode {
        self.response(id).map_or(LinFrameResponseMode::Unused, |r| r.mode)
    }

    /// Apply response updates. Returns the ids that were out of range.
    fn update_responses(&mut self, updates: &[LinFrameResponse]) -> Vec<LinId> {
        let mut invalid = Vec::new();
        for update in updates {
            match self.responses.get_mut(usize::from(update.frame.id)) {
                Some(slot) => *slot = *update,
                None => invalid.push(update.frame.id),
            }
        }
        invalid
    }

    fn is_responding(&self) -> bool {
        self.mode != LinControllerMode::Inactive && self.status == LinControllerStatus::Operational
    }
}

/// A LIN master or slave.
#[derive(Debug, Clone)]
pub struct LinController {
    name: String,
    node: LinNode,
    baud_rate: u32,
    peers: BTreeMap<ControllerDescriptor, LinNode>,
    slave_response_ids: BTreeSet<LinId>,
}

impl LinController {
    /// Uninitialized controller.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: LinNode::new(),
            baud_rate: 0,
            peers: BTreeMap::new(),
            slave_response_ids: BTreeSet::new(),
        }
    }

    /// Master, slave or inactive.
    pub fn mode(&self) -> LinControllerMode {
        self.node.mode
    }

    /// Operational status.
    pub fn status(&self) -> LinControllerStatus {
        self.node.status
    }

    /// Whether responses are supplied per header.
    pub fn is_dynamic(&self) -> bool {
        self.node.simulation_mode == LinSimulationMode::Dynamic
    }

    /// Own response for `id`.
    pub fn response(&self, id: LinId) -> Option<&LinFrameResponse> {
        self.node.response(id)
    }

    /// Ids for which some slave configured a response. Master only.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotMaster` on a slave
    pub fn slave_configuration(&self) -> Result<Vec<LinId>, ControllerError> {
        self.require_master()?;
        Ok(self.slave_response_ids.iter().copied().collect())
    }

    /// Initialize with a static response table.
    ///
    /// # Errors
    ///
    /// - `ControllerError::InvalidConfiguration` for mode `Inactive`
    /// - `ControllerError::AlreadyInitialized` on a second call
    pub fn init(&mut self, config: LinControllerConfig, ctx: NetworkContext) -> LinResult {
        self.check_init(config.mode)?;
        self.node.mode = config.mode;
        self.node.status = LinControllerStatus::Operational;
        self.node.simulation_mode = config.simulation_mode;
        self.baud_rate = config.baud_rate;

        let invalid = self.node.update_responses(&config.frame_responses);
        let mut actions = self.log_invalid_ids(invalid);
        actions.extend(self.distribute_config(LinRequest::ControllerConfig(config), ctx));
        Ok(actions)
    }

    /// Initialize in dynamic response mode: responses are supplied per header
    /// with [`Self::send_dynamic_response`].
    ///
    /// # Errors
    ///
    /// As for [`Self::init`].
    pub fn init_dynamic(
        &mut self,
        mode: LinControllerMode,
        baud_rate: u32,
        ctx: NetworkContext,
    ) -> LinResult {
        self.init(
            LinControllerConfig {
                mode,
                baud_rate,
                frame_responses: Vec::new(),
                simulation_mode: LinSimulationMode::Dynamic,
            },
            ctx,
        )
    }

    fn check_init(&self, mode: LinControllerMode) -> Result<(), ControllerError> {
        if mode == LinControllerMode::Inactive {
            return Err(ControllerError::InvalidConfiguration {
                controller: self.name.clone(),
                reason: "cannot initialize in mode Inactive".to_string(),
            });
        }
        if self.node.status != LinControllerStatus::Unknown {
            return Err(ControllerError::AlreadyInitialized { controller: self.name.clone() });
        }
        Ok(())
    }

    /// Send a complete frame. Master only, static mode only.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized`, `NotMaster` or `DynamicMode`
    pub fn send_frame(
        &mut self,
        frame: LinFrame,
        response_type: LinFrameResponseType,
        ctx: NetworkContext,
    ) -> LinResult {
        self.require_initialized()?;
        self.require_master()?;
        if self.is_dynamic() {
            return Err(ControllerError::DynamicMode { controller: self.name.clone() });
        }

        let mut actions = Vec::new();
        match response_type {
            LinFrameResponseType::MasterResponse => {
                actions.extend(self.update_frame_response(
                    LinFrameResponse { frame, mode: LinFrameResponseMode::TxUnconditional },
                    ctx,
                ));
            },
            LinFrameResponseType::SlaveResponse | LinFrameResponseType::SlaveToSlave => {
                if !self.slave_response_ids.contains(&frame.id) && !self.has_dynamic_node() {
                    actions.push(self.warn(format!(
                        "no slave configured a response for id {}",
                        frame.id
                    )));
                    actions.push(deliver_status(ctx, frame, LinFrameStatus::LIN_RX_NO_RESPONSE));
                    return Ok(actions);
                }

                if response_type == LinFrameResponseType::SlaveResponse {
                    match self.node.response_mode(frame.id) {
                        LinFrameResponseMode::Unused => {
                            actions.extend(self.update_frame_response(
                                LinFrameResponse { frame, mode: LinFrameResponseMode::Rx },
                                ctx,
                            ));
                        },
                        LinFrameResponseMode::TxUnconditional => {
                            actions.push(self.warn(format!(
                                "master already responds on id {}, ignoring slave response frame",
                                frame.id
                            )));
                            return Ok(actions);
                        },
                        LinFrameResponseMode::Rx => {},
                    }
                } else {
                    actions.push(deliver_status(ctx, frame, LinFrameStatus::LIN_TX_OK));
                }
            },
        }

        if ctx.is_simulated() {
            actions.push(request(LinRequest::Frame(LinSendFrameRequest { frame, response_type })));
        } else {
            actions.extend(self.trivial_header(frame.id, ctx));
        }
        Ok(actions)
    }

    /// Send a header; the responding node completes the frame. Master only.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized` or `NotMaster`
    /// - `ControllerError::InvalidLinId` for ids outside `0..64`
    pub fn send_frame_header(&mut self, id: LinId, ctx: NetworkContext) -> LinResult {
        self.require_initialized()?;
        self.require_master()?;
        if usize::from(id) >= MAX_LIN_ID {
            return Err(ControllerError::InvalidLinId(id));
        }

        if ctx.is_simulated() {
            return Ok(vec![request(LinRequest::FrameHeader(LinSendFrameHeaderRequest {
                timestamp: ctx.now,
                id,
            }))]);
        }
        Ok(self.trivial_header(id, ctx))
    }

    /// Answer a header in dynamic response mode.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotDynamic` unless initialized with
    ///   [`Self::init_dynamic`]
    pub fn send_dynamic_response(&mut self, frame: LinFrame, ctx: NetworkContext) -> LinResult {
        if !self.is_dynamic() {
            return Err(ControllerError::NotDynamic { controller: self.name.clone() });
        }
        if usize::from(frame.id) >= MAX_LIN_ID {
            return Err(ControllerError::InvalidLinId(frame.id));
        }

        let mut actions = self.update_frame_response(
            LinFrameResponse { frame, mode: LinFrameResponseMode::TxUnconditional },
            ctx,
        );
        if !ctx.is_simulated() {
            actions.extend(self.transmit_response(frame.id, ctx));
        }
        Ok(actions)
    }

    /// Configure the response for one id. Reconfiguring a used id is ignored.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized` or `DynamicMode`
    pub fn set_frame_response(
        &mut self,
        response: LinFrameResponse,
        ctx: NetworkContext,
    ) -> LinResult {
        self.require_initialized()?;
        if self.is_dynamic() {
            return Err(ControllerError::DynamicMode { controller: self.name.clone() });
        }

        let id = response.frame.id;
        if usize::from(id) >= MAX_LIN_ID {
            return Ok(vec![self.warn(format!("invalid LIN id {id} in set_frame_response"))]);
        }
        if response.mode == LinFrameResponseMode::Unused {
            return Ok(vec![self.warn("response mode Unused cannot be configured".to_string())]);
        }
        let current = self.node.response_mode(id);
        if current != LinFrameResponseMode::Unused {
            return Ok(vec![self.warn(format!(
                "response mode of id {id} is already configured to {current:?}"
            ))]);
        }
        Ok(self.update_frame_response(response, ctx))
    }

    /// Replace the payload of a configured `TxUnconditional` response.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized` or `DynamicMode`
    /// - `ControllerError::InvalidConfiguration` if the id is not configured
    ///   for transmission
    pub fn update_tx_buffer(&mut self, frame: LinFrame, ctx: NetworkContext) -> LinResult {
        self.require_initialized()?;
        if self.is_dynamic() {
            return Err(ControllerError::DynamicMode { controller: self.name.clone() });
        }
        if self.node.response_mode(frame.id) != LinFrameResponseMode::TxUnconditional {
            return Err(ControllerError::InvalidConfiguration {
                controller: self.name.clone(),
                reason: format!("id {} is not configured as TxUnconditional", frame.id),
            });
        }

        let Some(slot) = self.node.responses.get_mut(usize::from(frame.id)) else {
            return Err(ControllerError::InvalidLinId(frame.id));
        };
        slot.frame.data = frame.data;
        let response = *slot;

        if ctx.is_simulated() {
            Ok(vec![request(LinRequest::FrameResponseUpdate(vec![response]))])
        } else {
            Ok(Vec::new())
        }
    }

    /// Put the cluster to sleep. Master only. A controller that is already
    /// asleep ignores the call.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized` or `NotMaster`
    pub fn go_to_sleep(&mut self, ctx: NetworkContext) -> LinResult {
        self.require_initialized()?;
        self.require_master()?;

        if matches!(self.node.status, LinControllerStatus::Sleep | LinControllerStatus::SleepPending)
        {
            return Ok(vec![ControllerAction::Log(LogRecord::debug(format!(
                "LIN controller '{}' is already asleep",
                self.name
            )))]);
        }

        let frame = LinFrame::go_to_sleep();
        if ctx.is_simulated() {
            // Sleep is entered once the simulator confirms the transmission.
            self.node.status = LinControllerStatus::SleepPending;
            return Ok(vec![request(LinRequest::Frame(LinSendFrameRequest {
                frame,
                response_type: LinFrameResponseType::MasterResponse,
            }))]);
        }

        let mut actions = vec![
            ControllerAction::Broadcast(PeerPayload::Event(frame_status(
                ctx,
                frame,
                LinFrameStatus::LIN_RX_OK,
            ))),
            deliver_status(ctx, frame, LinFrameStatus::LIN_TX_OK),
        ];
        actions.extend(self.set_status(LinControllerStatus::Sleep, ctx));
        Ok(actions)
    }

    /// Enter sleep after observing a go-to-sleep command.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized`
    pub fn go_to_sleep_internal(&mut self, ctx: NetworkContext) -> LinResult {
        self.require_initialized()?;
        Ok(self.set_status(LinControllerStatus::Sleep, ctx))
    }

    /// Send a wakeup pulse and become operational.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized`
    pub fn wakeup(&mut self, ctx: NetworkContext) -> LinResult {
        self.require_initialized()?;

        let mut actions = if ctx.is_simulated() {
            vec![request(LinRequest::WakeupPulse(LinWakeupPulse {
                timestamp: ctx.now,
                direction: TransmitDirection::Tx,
            }))]
        } else {
            vec![
                ControllerAction::Broadcast(PeerPayload::Request(NetworkRequest::Lin(
                    LinRequest::WakeupPulse(LinWakeupPulse {
                        timestamp: ctx.now,
                        direction: TransmitDirection::Rx,
                    }),
                ))),
                ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::Wakeup(LinWakeupEvent {
                    timestamp: ctx.now,
                    direction: TransmitDirection::Tx,
                }))),
            ]
        };
        actions.extend(self.set_status(LinControllerStatus::Operational, ctx));
        Ok(actions)
    }

    /// Become operational after observing a wakeup pulse.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized`
    pub fn wakeup_internal(&mut self, ctx: NetworkContext) -> LinResult {
        self.require_initialized()?;
        Ok(self.set_status(LinControllerStatus::Operational, ctx))
    }

    pub(super) fn on_peer(
        &mut self,
        from: ControllerDescriptor,
        payload: &PeerPayload,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        match payload {
            PeerPayload::Event(NetworkEvent::Lin(LinEvent::FrameStatus(transmission))) => {
                self.on_transmission(*transmission, false)
            },
            PeerPayload::Request(NetworkRequest::Lin(request)) => match request {
                LinRequest::FrameHeader(header) => {
                    self.on_header(header.id, NetworkContext { now: header.timestamp, ..ctx })
                },
                LinRequest::WakeupPulse(pulse) => {
                    vec![ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::Wakeup(
                        LinWakeupEvent { timestamp: pulse.timestamp, direction: pulse.direction },
                    )))]
                },
                LinRequest::ControllerConfig(config) => {
                    let node = self.peers.entry(from).or_insert_with(LinNode::new);
                    node.mode = config.mode;
                    node.status = LinControllerStatus::Operational;
                    node.simulation_mode = config.simulation_mode;
                    self.on_responses_update(from, &config.frame_responses)
                },
                LinRequest::FrameResponseUpdate(responses) => {
                    self.on_responses_update(from, responses)
                },
                LinRequest::ControllerStatusUpdate(status) => {
                    self.peers.entry(from).or_insert_with(LinNode::new).status = *status;
                    Vec::new()
                },
                LinRequest::Frame(_) => Vec::new(),
            },
            PeerPayload::Event(_) | PeerPayload::Request(_) => Vec::new(),
        }
    }

    pub(super) fn on_simulated_event(&mut self, event: NetworkEvent) -> Vec<ControllerAction> {
        match event {
            NetworkEvent::Lin(LinEvent::FrameStatus(transmission)) => {
                let mut actions = self.on_transmission(transmission, true);
                if transmission.frame.is_go_to_sleep()
                    && self.node.status == LinControllerStatus::SleepPending
                {
                    self.node.status = LinControllerStatus::Sleep;
                    actions.push(request(LinRequest::ControllerStatusUpdate(
                        LinControllerStatus::Sleep,
                    )));
                }
                actions
            },
            NetworkEvent::Lin(LinEvent::FrameHeader(header)) => {
                if self.is_dynamic() {
                    vec![ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::FrameHeader(header)))]
                } else {
                    Vec::new()
                }
            },
            event @ NetworkEvent::Lin(LinEvent::Wakeup(_) | LinEvent::GoToSleep(_)) => {
                vec![ControllerAction::Deliver(event)]
            },
            other => vec![self.warn(format!("received a {} event", other.kind()))],
        }
    }

    pub(super) fn on_peer_announced(&mut self, info: &ControllerInfo) -> Vec<ControllerAction> {
        // Only slaves share their configuration; a late joiner gets it here.
        if self.node.mode != LinControllerMode::Slave {
            return Vec::new();
        }

        let config = LinControllerConfig {
            mode: self.node.mode,
            baud_rate: self.baud_rate,
            frame_responses: self
                .node
                .responses
                .iter()
                .filter(|r| r.mode != LinFrameResponseMode::Unused)
                .copied()
                .collect(),
            simulation_mode: self.node.simulation_mode,
        };
        let mut actions = vec![ControllerAction::SendTo {
            to: info.descriptor,
            payload: PeerPayload::Request(NetworkRequest::Lin(LinRequest::ControllerConfig(config))),
        }];
        if self.node.status != LinControllerStatus::Operational {
            actions.push(ControllerAction::SendTo {
                to: info.descriptor,
                payload: PeerPayload::Request(NetworkRequest::Lin(
                    LinRequest::ControllerStatusUpdate(self.node.status),
                )),
            });
        }
        actions
    }

    pub(super) fn on_peer_removed(&mut self, descriptor: ControllerDescriptor) {
        if self.peers.remove(&descriptor).is_some() {
            self.recompute_slave_ids();
        }
    }

    fn on_responses_update(
        &mut self,
        from: ControllerDescriptor,
        responses: &[LinFrameResponse],
    ) -> Vec<ControllerAction> {
        let node = self.peers.entry(from).or_insert_with(LinNode::new);
        let invalid = node.update_responses(responses);
        if node.mode == LinControllerMode::Slave {
            self.slave_response_ids.extend(
                responses
                    .iter()
                    .filter(|r| r.mode == LinFrameResponseMode::TxUnconditional)
                    .map(|r| r.frame.id),
            );
        }
        self.log_invalid_ids(invalid)
    }

    fn recompute_slave_ids(&mut self) {
        self.slave_response_ids = self
            .peers
            .values()
            .filter(|node| node.mode == LinControllerMode::Slave)
            .flat_map(|node| node.responses.iter())
            .filter(|r| r.mode == LinFrameResponseMode::TxUnconditional)
            .map(|r| r.frame.id)
            .collect();
    }

    /// Master side of a header on a trivial network.
    fn trivial_header(&mut self, id: LinId, ctx: NetworkContext) -> Vec<ControllerAction> {
        let (responders, frame) = self.responders(id);

        if responders == 1 || (responders == 0 && self.has_dynamic_node()) {
            let mut actions = vec![ControllerAction::Broadcast(PeerPayload::Request(
                NetworkRequest::Lin(LinRequest::FrameHeader(LinSendFrameHeaderRequest {
                    timestamp: ctx.now,
                    id,
                })),
            ))];
            actions.extend(self.on_header(id, ctx));
            return actions;
        }

        let status = if responders == 0 {
            LinFrameStatus::LIN_RX_NO_RESPONSE
        } else {
            LinFrameStatus::LIN_RX_ERROR
        };
        let own_status = if self.node.response_mode(id) == LinFrameResponseMode::TxUnconditional {
            // Master and at least one slave both answer.
            LinFrameStatus::LIN_TX_ERROR
        } else {
            status
        };
        vec![
            ControllerAction::Broadcast(PeerPayload::Event(frame_status(ctx, frame, status))),
            deliver_status(ctx, frame, own_status),
        ]
    }

    /// Number of operational nodes answering `id`, and the answer.
    fn responders(&self, id: LinId) -> (usize, LinFrame) {
        let mut count = 0;
        let mut frame = LinFrame::empty(id);
        for node in std::iter::once(&self.node).chain(self.peers.values()) {
            if !node.is_responding() {
                continue;
            }
            if let Some(response) = node.response(id)
                && response.mode == LinFrameResponseMode::TxUnconditional
            {
                frame = response.frame;
                count += 1;
            }
        }
        (count, frame)
    }

    fn has_dynamic_node(&self) -> bool {
        std::iter::once(&self.node)
            .chain(self.peers.values())
            .any(|node| node.simulation_mode == LinSimulationMode::Dynamic)
    }

    fn on_header(&mut self, id: LinId, ctx: NetworkContext) -> Vec<ControllerAction> {
        if self.is_dynamic() {
            return vec![ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::FrameHeader(
                LinFrameHeaderEvent { timestamp: ctx.now, id },
            )))];
        }
        self.transmit_response(id, ctx)
    }

    /// Answer a header with the configured response, if this node has one.
    fn transmit_response(&mut self, id: LinId, ctx: NetworkContext) -> Vec<ControllerAction> {
        let Some(response) = self.node.response(id).copied() else {
            return Vec::new();
        };
        if response.mode != LinFrameResponseMode::TxUnconditional {
            return Vec::new();
        }
        if response.frame.data_length == DATA_LENGTH_UNKNOWN {
            return vec![self.warn(format!("response for id {id} has an undefined data length"))];
        }

        vec![
            ControllerAction::Broadcast(PeerPayload::Event(frame_status(
                ctx,
                response.frame,
                LinFrameStatus::LIN_RX_OK,
            ))),
            deliver_status(ctx, response.frame, LinFrameStatus::LIN_TX_OK),
        ]
    }

    fn on_transmission(
        &mut self,
        transmission: LinFrameStatusEvent,
        simulated: bool,
    ) -> Vec<ControllerAction> {
        if self.node.mode == LinControllerMode::Inactive {
            return vec![self.warn("inactive controller received a transmission".to_string())];
        }

        let frame = transmission.frame;
        if frame.data_length != DATA_LENGTH_UNKNOWN && frame.data_length > MAX_DATA_LENGTH {
            return vec![self.warn(format!(
                "ignoring transmission with invalid data length {}",
                frame.data_length
            ))];
        }
        if usize::from(frame.id) >= MAX_LIN_ID {
            return vec![self.warn(format!("ignoring transmission with invalid id {}", frame.id))];
        }

        let mut actions = Vec::new();
        let status = if simulated {
            transmission.status
        } else {
            self.frame_status_for(&transmission, &mut actions)
        };
        if status != LinFrameStatus::NOT_OK {
            actions.push(ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::FrameStatus(
                LinFrameStatusEvent { status, ..transmission },
            ))));
        }
        if frame.is_go_to_sleep() && self.node.mode == LinControllerMode::Slave {
            actions.push(ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::GoToSleep(
                LinGoToSleepEvent { timestamp: transmission.timestamp },
            ))));
        }
        actions
    }

    /// Status of a trivial transmission as seen by this node.
    fn frame_status_for(
        &self,
        transmission: &LinFrameStatusEvent,
        actions: &mut Vec<ControllerAction>,
    ) -> LinFrameStatus {
        if self.is_dynamic() {
            return transmission.status;
        }

        let received = transmission.frame;
        let Some(configured) = self.node.response(received.id) else {
            return LinFrameStatus::NOT_OK;
        };
        match configured.mode {
            LinFrameResponseMode::Unused => LinFrameStatus::NOT_OK,
            LinFrameResponseMode::Rx => {
                let expected = configured.frame;
                if expected.data_length != DATA_LENGTH_UNKNOWN
                    && expected.data_length != received.data_length
                {
                    actions.push(self.warn(format!(
                        "id {}: configured data length {} but received {}",
                        received.id, expected.data_length, received.data_length
                    )));
                    return LinFrameStatus::LIN_RX_ERROR;
                }
                if expected.checksum_model != LinChecksumModel::Unknown
                    && received.checksum_model != LinChecksumModel::Unknown
                    && expected.checksum_model != received.checksum_model
                {
                    actions.push(self.warn(format!(
                        "id {}: configured checksum model {:?} but received {:?}",
                        received.id, expected.checksum_model, received.checksum_model
                    )));
                    return LinFrameStatus::LIN_RX_ERROR;
                }
                transmission.status
            },
            LinFrameResponseMode::TxUnconditional => transmission.status.to_tx(),
        }
    }

    fn update_frame_response(
        &mut self,
        response: LinFrameResponse,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        let invalid = self.node.update_responses(&[response]);
        let mut actions = self.log_invalid_ids(invalid);
        actions.extend(self.distribute_config(LinRequest::FrameResponseUpdate(vec![response]), ctx));
        actions
    }

    fn set_status(
        &mut self,
        status: LinControllerStatus,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        if self.node.status == status {
            actions.push(self.warn(format!("controller is already {status:?}")));
        }
        self.node.status = status;

        let update = LinRequest::ControllerStatusUpdate(status);
        if ctx.is_simulated() {
            actions.push(request(update));
        } else {
            actions.push(ControllerAction::Broadcast(PeerPayload::Request(NetworkRequest::Lin(
                update,
            ))));
        }
        actions
    }

    /// Configuration and response updates reach the simulator always, but
    /// only slaves share them with peers.
    fn distribute_config(&self, update: LinRequest, ctx: NetworkContext) -> Vec<ControllerAction> {
        if ctx.is_simulated() {
            vec![request(update)]
        } else if self.node.mode == LinControllerMode::Slave {
            vec![ControllerAction::Broadcast(PeerPayload::Request(NetworkRequest::Lin(update)))]
        } else {
            Vec::new()
        }
    }

    fn require_initialized(&self) -> Result<(), ControllerError> {
        if self.node.status == LinControllerStatus::Unknown {
            return Err(ControllerError::NotInitialized { controller: self.name.clone() });
        }
        Ok(())
    }

    fn require_master(&self) -> Result<(), ControllerError> {
        if self.node.mode != LinControllerMode::Master {
            return Err(ControllerError::NotMaster { controller: self.name.clone() });
        }
        Ok(())
    }

    fn log_invalid_ids(&self, ids: Vec<LinId>) -> Vec<ControllerAction> {
        ids.into_iter()
            .map(|id| self.warn(format!("ignoring response update for invalid id {id}")))
            .collect()
    }

    fn warn(&self, message: String) -> ControllerAction {
        ControllerAction::Log(LogRecord::warn(format!("LIN controller '{}': {message}", self.name)))
    }
}

fn request(request: LinRequest) -> ControllerAction {
    ControllerAction::Request(NetworkRequest::Lin(request))
}

fn frame_status(ctx: NetworkContext, frame: LinFrame, status: LinFrameStatus) -> NetworkEvent {
    NetworkEvent::Lin(LinEvent::FrameStatus(LinFrameStatusEvent {
        timestamp: ctx.now,
        frame,
        status,
    }))
}

fn deliver_status(ctx: NetworkContext, frame: LinFrame, status: LinFrameStatus) -> ControllerAction {
    ControllerAction::Deliver(frame_status(ctx, frame, status))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cosim_proto::{ControllerHandle, ParticipantId};

    use super::*;

    const NOW: Duration = Duration::from_millis(5);

    fn ctx() -> NetworkContext {
        NetworkContext::trivial(NOW)
    }

    fn descriptor(participant: u64) -> ControllerDescriptor {
        ControllerDescriptor::new(ParticipantId(participant), ControllerHandle::new(0, 0))
    }

    fn config(mode: LinControllerMode, responses: Vec<LinFrameResponse>) -> LinControllerConfig {
        LinControllerConfig {
            mode,
            baud_rate: 20_000,
            frame_responses: responses,
            simulation_mode: LinSimulationMode::Default,
        }
    }

    fn frame(id: LinId) -> LinFrame {
        LinFrame::new(id, LinChecksumModel::Enhanced, 4, [1, 2, 3, 4, 0, 0, 0, 0])
    }

    fn tx(frame: LinFrame) -> LinFrameResponse {
        LinFrameResponse { frame, mode: LinFrameResponseMode::TxUnconditional }
    }

    fn rx(frame: LinFrame) -> LinFrameResponse {
        LinFrameResponse { frame, mode: LinFrameResponseMode::Rx }
    }

    fn delivered_statuses(actions: &[ControllerAction]) -> Vec<LinFrameStatus> {
        actions
            .iter()
            .filter_map(|a| match a {
                ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::FrameStatus(e))) => {
                    Some(e.status)
                },
                _ => None,
            })
            .collect()
    }

    fn broadcasts(actions: &[ControllerAction]) -> Vec<&PeerPayload> {
        actions
            .iter()
            .filter_map(|a| match a {
                ControllerAction::Broadcast(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Forward every broadcast of `from` to `to`, returning `to`'s actions.
    fn forward(
        actions: &[ControllerAction],
        from: ControllerDescriptor,
        to: &mut LinController,
    ) -> Vec<ControllerAction> {
        broadcasts(actions).into_iter().flat_map(|p| to.on_peer(from, p, ctx())).collect()
    }

    #[test]
    fn inactive_and_duplicate_init_are_rejected() {
        let mut lin = LinController::new("LIN1");
        assert!(matches!(
            lin.init(config(LinControllerMode::Inactive, vec![]), ctx()),
            Err(ControllerError::InvalidConfiguration { .. })
        ));
        lin.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        assert!(matches!(
            lin.init(config(LinControllerMode::Master, vec![]), ctx()),
            Err(ControllerError::AlreadyInitialized { .. })
        ));
    }

    #[test]
    fn out_of_range_response_ids_are_logged_and_skipped() {
        let mut lin = LinController::new("LIN1");
        let invalid = tx(frame(LinId::try_from(MAX_LIN_ID).unwrap()));
        let actions =
            lin.init(config(LinControllerMode::Slave, vec![tx(frame(17)), invalid]), ctx()).unwrap();

        let warnings: Vec<&LogRecord> = actions
            .iter()
            .filter_map(|a| match a {
                ControllerAction::Log(record) => Some(record),
                _ => None,
            })
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains(&format!("invalid id {MAX_LIN_ID}")));
        assert_eq!(lin.response(17).map(|r| r.mode), Some(LinFrameResponseMode::TxUnconditional));
    }

    #[test]
    fn uninitialized_operations_fail() {
        let mut lin = LinController::new("LIN1");
        assert!(lin.go_to_sleep(ctx()).is_err());
        assert!(lin.wakeup(ctx()).is_err());
        assert!(lin.send_frame_header(1, ctx()).is_err());
        assert!(lin.send_frame(frame(1), LinFrameResponseType::MasterResponse, ctx()).is_err());
    }

    #[test]
    fn master_response_is_answered_by_master() {
        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        let mut slave = LinController::new("LIN1");
        slave.init(config(LinControllerMode::Slave, vec![rx(frame(17))]), ctx()).unwrap();

        let actions =
            master.send_frame(frame(17), LinFrameResponseType::MasterResponse, ctx()).unwrap();
        assert_eq!(delivered_statuses(&actions), vec![LinFrameStatus::LIN_TX_OK]);

        let received = forward(&actions, descriptor(1), &mut slave);
        assert_eq!(delivered_statuses(&received), vec![LinFrameStatus::LIN_RX_OK]);
    }

    #[test]
    fn slave_response_reaches_master() {
        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        let mut slave = LinController::new("LIN1");
        let init = slave.init(config(LinControllerMode::Slave, vec![tx(frame(17))]), ctx()).unwrap();
        forward(&init, descriptor(2), &mut master);
        assert_eq!(master.slave_configuration().unwrap(), vec![17]);

        let header =
            master.send_frame(frame(17), LinFrameResponseType::SlaveResponse, ctx()).unwrap();
        let response = forward(&header, descriptor(1), &mut slave);
        assert_eq!(delivered_statuses(&response), vec![LinFrameStatus::LIN_TX_OK]);

        let received = forward(&response, descriptor(2), &mut master);
        assert_eq!(delivered_statuses(&received), vec![LinFrameStatus::LIN_RX_OK]);
    }

    #[test]
    fn unanswered_slave_response_reports_no_response() {
        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        let actions =
            master.send_frame(frame(17), LinFrameResponseType::SlaveResponse, ctx()).unwrap();
        assert_eq!(delivered_statuses(&actions), vec![LinFrameStatus::LIN_RX_NO_RESPONSE]);
        assert!(broadcasts(&actions).is_empty());
    }

    #[test]
    fn two_responders_collide() {
        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![tx(frame(17))]), ctx()).unwrap();
        let mut slave = LinController::new("LIN1");
        let init = slave.init(config(LinControllerMode::Slave, vec![tx(frame(17))]), ctx()).unwrap();
        forward(&init, descriptor(2), &mut master);

        let actions = master.send_frame_header(17, ctx()).unwrap();
        assert_eq!(delivered_statuses(&actions), vec![LinFrameStatus::LIN_TX_ERROR]);
    }

    #[test]
    fn mismatching_data_length_is_an_rx_error() {
        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        let mut slave = LinController::new("LIN1");
        let mut expected = frame(17);
        expected.data_length = 2;
        slave.init(config(LinControllerMode::Slave, vec![rx(expected)]), ctx()).unwrap();

        let actions =
            master.send_frame(frame(17), LinFrameResponseType::MasterResponse, ctx()).unwrap();
        let received = forward(&actions, descriptor(1), &mut slave);
        assert_eq!(delivered_statuses(&received), vec![LinFrameStatus::LIN_RX_ERROR]);
    }

    #[test]
    fn dynamic_slave_answers_header() {
        let mut master = LinController::new("LIN1");
        master.init_dynamic(LinControllerMode::Master, 20_000, ctx()).unwrap();
        let mut slave = LinController::new("LIN1");
        let init = slave.init_dynamic(LinControllerMode::Slave, 20_000, ctx()).unwrap();
        forward(&init, descriptor(2), &mut master);

        let header = master.send_frame_header(34, ctx()).unwrap();
        let seen = forward(&header, descriptor(1), &mut slave);
        assert!(seen.iter().any(|a| matches!(
            a,
            ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::FrameHeader(h))) if h.id == 34
        )));

        let response = LinFrame::new(34, LinChecksumModel::Enhanced, 6, [3, 4, 3, 4, 3, 4, 3, 4]);
        let answer = slave.send_dynamic_response(response, ctx()).unwrap();
        let received = forward(&answer, descriptor(2), &mut master);
        let statuses: Vec<_> = received
            .iter()
            .filter_map(|a| match a {
                ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::FrameStatus(e))) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, LinFrameStatus::LIN_RX_OK);
        assert_eq!(statuses[0].frame, response);
    }

    #[test]
    fn go_to_sleep_twice_fires_once() {
        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        let mut slave = LinController::new("LIN1");
        slave.init(config(LinControllerMode::Slave, vec![]), ctx()).unwrap();

        let first = master.go_to_sleep(ctx()).unwrap();
        assert_eq!(master.status(), LinControllerStatus::Sleep);
        let received = forward(&first, descriptor(1), &mut slave);
        let sleeps = received
            .iter()
            .filter(|a| matches!(a, ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::GoToSleep(_)))))
            .count();
        assert_eq!(sleeps, 1);

        let second = master.go_to_sleep(ctx()).unwrap();
        assert!(broadcasts(&second).is_empty());
        assert!(delivered_statuses(&second).is_empty());
    }

    #[test]
    fn wakeup_delivers_tx_locally_and_rx_remotely() {
        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        let mut slave = LinController::new("LIN1");
        slave.init(config(LinControllerMode::Slave, vec![]), ctx()).unwrap();
        master.go_to_sleep(ctx()).unwrap();

        let actions = master.wakeup(ctx()).unwrap();
        assert_eq!(master.status(), LinControllerStatus::Operational);
        assert!(actions.iter().any(|a| matches!(
            a,
            ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::Wakeup(w)))
                if w.direction == TransmitDirection::Tx
        )));
        let received = forward(&actions, descriptor(1), &mut slave);
        assert!(received.iter().any(|a| matches!(
            a,
            ControllerAction::Deliver(NetworkEvent::Lin(LinEvent::Wakeup(w)))
                if w.direction == TransmitDirection::Rx
        )));
    }

    #[test]
    fn late_joiner_receives_slave_configuration() {
        let mut slave = LinController::new("LIN1");
        slave.init(config(LinControllerMode::Slave, vec![tx(frame(17))]), ctx()).unwrap();
        let info = ControllerInfo {
            descriptor: descriptor(1),
            participant_name: "Master".to_string(),
            controller_name: "LIN1".to_string(),
            network: "LIN1".to_string(),
            kind: cosim_proto::NetworkKind::Lin,
        };
        let actions = slave.on_peer_announced(&info);
        let [ControllerAction::SendTo { to, payload }] = actions.as_slice() else {
            panic!("expected one replay, got {actions:?}");
        };
        assert_eq!(*to, descriptor(1));

        let mut master = LinController::new("LIN1");
        master.init(config(LinControllerMode::Master, vec![]), ctx()).unwrap();
        master.on_peer(descriptor(2), payload, ctx());
        assert_eq!(master.slave_configuration().unwrap(), vec![17]);
    }
}
