//! FlexRay controller.
//!
//! On a simulated network the POC state is whatever the simulator last
//! reported. On a trivial network the controller walks the POC states itself:
//! configuring makes it `Ready`, `Run` makes it `NormalActive`, and a halt or
//! freeze ends in `Halt`. Any host command while halted is ignored.

use cosim_proto::{
    NetworkEvent, NetworkRequest, PeerPayload,
    payloads::flexray::{
        FlexrayChannel, FlexrayControllerConfig, FlexrayEvent, FlexrayFrame, FlexrayFrameEvent,
        FlexrayFrameTransmitEvent, FlexrayHeader, FlexrayHostCommand, FlexrayPocState,
        FlexrayPocStatusEvent, FlexrayRequest, FlexraySymbolEvent, FlexraySymbolPattern,
        FlexrayTxBufferConfig, FlexrayTxBufferConfigUpdate, FlexrayTxBufferUpdate,
        FlexrayWakeupStatus,
    },
};

use super::{ControllerAction, NetworkContext};
use crate::{error::ControllerError, log::LogRecord};

/// A FlexRay communication controller.
#[derive(Debug, Clone)]
pub struct FlexrayController {
    name: String,
    config: Option<FlexrayControllerConfig>,
    poc: FlexrayPocStatusEvent,
}

impl FlexrayController {
    /// Controller in POC state `DefaultConfig`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
            poc: FlexrayPocStatusEvent {
                timestamp: std::time::Duration::ZERO,
                state: FlexrayPocState::DefaultConfig,
                freeze: false,
                chi_halt_request: false,
                wakeup_status: FlexrayWakeupStatus::Undefined,
            },
        }
    }

    /// Current POC state.
    pub fn poc_state(&self) -> FlexrayPocState {
        self.poc.state
    }

    /// Last POC status.
    pub fn poc_status(&self) -> FlexrayPocStatusEvent {
        self.poc
    }

    /// Applied configuration.
    pub fn config(&self) -> Option<&FlexrayControllerConfig> {
        self.config.as_ref()
    }

    /// Apply the node configuration.
    pub fn configure(
        &mut self,
        config: FlexrayControllerConfig,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        if let Some(halted) = self.reject_if_halted("configure") {
            return vec![halted];
        }
        self.config = Some(config.clone());
        if ctx.is_simulated() {
            return vec![request(FlexrayRequest::ControllerConfig(config))];
        }
        vec![self.set_poc(FlexrayPocState::Ready, ctx)]
    }

    /// Replace the configuration of one transmit buffer.
    ///
    /// # Errors
    ///
    /// - `ControllerError::NotInitialized` before [`Self::configure`]
    /// - `ControllerError::UnknownTxBuffer` for an index outside the
    ///   configured buffers
    pub fn reconfigure_tx_buffer(
        &mut self,
        tx_buffer_index: u16,
        config: FlexrayTxBufferConfig,
        ctx: NetworkContext,
    ) -> Result<Vec<ControllerAction>, ControllerError> {
        self.buffer_mut(tx_buffer_index)?;
        if let Some(halted) = self.reject_if_halted("reconfigure_tx_buffer") {
            return Ok(vec![halted]);
        }
        *self.buffer_mut(tx_buffer_index)? = config;
        if ctx.is_simulated() {
            return Ok(vec![request(FlexrayRequest::TxBufferConfigUpdate(
                FlexrayTxBufferConfigUpdate { tx_buffer_index, config },
            ))]);
        }
        Ok(Vec::new())
    }

    /// Provide a new payload for a transmit buffer.
    ///
    /// On a trivial network a valid payload is sent at once on every channel
    /// of the buffer.
    ///
    /// # Errors
    ///
    /// As for [`Self::reconfigure_tx_buffer`].
    pub fn update_tx_buffer(
        &mut self,
        update: FlexrayTxBufferUpdate,
        ctx: NetworkContext,
    ) -> Result<Vec<ControllerAction>, ControllerError> {
        let buffer = *self.buffer_mut(update.tx_buffer_index)?;
        if let Some(halted) = self.reject_if_halted("update_tx_buffer") {
            return Ok(vec![halted]);
        }
        if ctx.is_simulated() {
            return Ok(vec![request(FlexrayRequest::TxBufferUpdate(update))]);
        }
        if !update.payload_valid {
            return Ok(Vec::new());
        }

        let channels: &[FlexrayChannel] = match buffer.channels {
            FlexrayChannel::None => {
                return Ok(vec![self.warn(format!(
                    "transmit buffer {} has no channel assigned",
                    update.tx_buffer_index
                ))]);
            },
            FlexrayChannel::A => &[FlexrayChannel::A],
            FlexrayChannel::B => &[FlexrayChannel::B],
            FlexrayChannel::AB => &[FlexrayChannel::A, FlexrayChannel::B],
        };

        let frame = FlexrayFrame {
            header: FlexrayHeader {
                frame_id: buffer.slot_id,
                payload_length: u8::try_from(update.payload.len().div_ceil(2)).unwrap_or(u8::MAX),
                header_crc: buffer.header_crc,
                cycle_count: 0,
            },
            payload: update.payload,
        };

        let mut actions = Vec::with_capacity(channels.len() * 2);
        for &channel in channels {
            actions.push(ControllerAction::Broadcast(PeerPayload::Event(NetworkEvent::FlexRay(
                FlexrayEvent::Frame(FlexrayFrameEvent {
                    timestamp: ctx.now,
                    channel,
                    frame: frame.clone(),
                }),
            ))));
            actions.push(ControllerAction::Deliver(NetworkEvent::FlexRay(
                FlexrayEvent::FrameTransmit(FlexrayFrameTransmitEvent {
                    timestamp: ctx.now,
                    tx_buffer_index: update.tx_buffer_index,
                    channel,
                    frame: frame.clone(),
                }),
            )));
        }
        Ok(actions)
    }

    /// Start communication.
    pub fn run(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.host_command(FlexrayHostCommand::Run, ctx)
    }

    /// Halt at the end of the current cycle.
    pub fn deferred_halt(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.host_command(FlexrayHostCommand::DeferredHalt, ctx)
    }

    /// Halt immediately.
    pub fn freeze(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.host_command(FlexrayHostCommand::Freeze, ctx)
    }

    /// Allow this node to start the cluster.
    pub fn allow_coldstart(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.host_command(FlexrayHostCommand::AllowColdstart, ctx)
    }

    /// Leave single-slot mode.
    pub fn all_slots(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.host_command(FlexrayHostCommand::AllSlots, ctx)
    }

    /// Send a wakeup pattern.
    pub fn wakeup(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.host_command(FlexrayHostCommand::Wakeup, ctx)
    }

    fn host_command(
        &mut self,
        command: FlexrayHostCommand,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        if let Some(halted) = self.reject_if_halted(&format!("{command:?}")) {
            return vec![halted];
        }
        if ctx.is_simulated() {
            return vec![request(FlexrayRequest::HostCommand(command))];
        }

        match command {
            FlexrayHostCommand::Run => {
                let mut actions = self.send_symbol(FlexrayChannel::A, FlexraySymbolPattern::CasMts, ctx);
                actions.extend(self.send_symbol(FlexrayChannel::B, FlexraySymbolPattern::CasMts, ctx));
                actions.push(self.set_poc(FlexrayPocState::NormalActive, ctx));
                actions
            },
            FlexrayHostCommand::Wakeup => {
                let mut actions = self.send_symbol(FlexrayChannel::A, FlexraySymbolPattern::Wus, ctx);
                self.poc.wakeup_status = FlexrayWakeupStatus::Transmitted;
                actions.push(self.set_poc(FlexrayPocState::Wakeup, ctx));
                actions.push(self.set_poc(FlexrayPocState::Ready, ctx));
                actions
            },
            FlexrayHostCommand::DeferredHalt => {
                self.poc.chi_halt_request = true;
                vec![self.set_poc(FlexrayPocState::Halt, ctx)]
            },
            FlexrayHostCommand::Freeze => {
                self.poc.freeze = true;
                vec![self.set_poc(FlexrayPocState::Halt, ctx)]
            },
            FlexrayHostCommand::AllowColdstart | FlexrayHostCommand::AllSlots => {
                vec![ControllerAction::Log(LogRecord::debug(format!(
                    "FlexRay controller '{}': {command:?} has no effect on a trivial network",
                    self.name
                )))]
            },
        }
    }

    /// Broadcast a symbol and report its transmission locally.
    fn send_symbol(
        &self,
        channel: FlexrayChannel,
        pattern: FlexraySymbolPattern,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        let symbol = FlexraySymbolEvent { timestamp: ctx.now, channel, pattern };
        vec![
            ControllerAction::Broadcast(PeerPayload::Event(NetworkEvent::FlexRay(
                FlexrayEvent::Symbol(symbol),
            ))),
            ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::SymbolTransmit(symbol))),
        ]
    }

    fn set_poc(&mut self, state: FlexrayPocState, ctx: NetworkContext) -> ControllerAction {
        self.poc.state = state;
        self.poc.timestamp = ctx.now;
        ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::PocStatus(self.poc)))
    }

    pub(super) fn on_peer(&mut self, payload: &PeerPayload) -> Vec<ControllerAction> {
        match payload {
            PeerPayload::Event(event @ NetworkEvent::FlexRay(FlexrayEvent::Frame(_))) => {
                vec![ControllerAction::Deliver(event.clone())]
            },
            PeerPayload::Event(NetworkEvent::FlexRay(FlexrayEvent::Symbol(symbol))) => {
                received_symbol(*symbol)
            },
            _ => Vec::new(),
        }
    }

    pub(super) fn on_simulated_event(&mut self, event: NetworkEvent) -> Vec<ControllerAction> {
        match event {
            NetworkEvent::FlexRay(FlexrayEvent::PocStatus(status)) => {
                self.poc = status;
                vec![ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::PocStatus(
                    status,
                )))]
            },
            NetworkEvent::FlexRay(FlexrayEvent::Symbol(symbol)) => received_symbol(symbol),
            event @ NetworkEvent::FlexRay(_) => vec![ControllerAction::Deliver(event)],
            other => vec![self.warn(format!("received a {} event", other.kind()))],
        }
    }

    fn buffer_mut(&mut self, index: u16) -> Result<&mut FlexrayTxBufferConfig, ControllerError> {
        let Some(config) = self.config.as_mut() else {
            return Err(ControllerError::NotInitialized { controller: self.name.clone() });
        };
        config
            .buffer_configs
            .get_mut(usize::from(index))
            .ok_or_else(|| ControllerError::UnknownTxBuffer { controller: self.name.clone(), index })
    }

    fn reject_if_halted(&self, operation: &str) -> Option<ControllerAction> {
        (self.poc.state == FlexrayPocState::Halt).then(|| {
            self.warn(format!("ignoring {operation} while POC state is Halt"))
        })
    }

    fn warn(&self, message: String) -> ControllerAction {
        ControllerAction::Log(LogRecord::warn(format!(
            "FlexRay controller '{}': {message}",
            self.name
        )))
    }
}

/// Wakeup patterns also reach wakeup handlers, ahead of the symbol handlers.
fn received_symbol(symbol: FlexraySymbolEvent) -> Vec<ControllerAction> {
    let mut actions = Vec::with_capacity(2);
    if matches!(symbol.pattern, FlexraySymbolPattern::Wus | FlexraySymbolPattern::Wudop) {
        actions.push(ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::Wakeup(symbol))));
    }
    actions.push(ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::Symbol(symbol))));
    actions
}

fn request(request: FlexrayRequest) -> ControllerAction {
    ControllerAction::Request(NetworkRequest::FlexRay(request))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cosim_proto::payloads::flexray::FlexrayTransmissionMode;

    use super::*;

    const NOW: Duration = Duration::from_millis(2);

    fn ctx() -> NetworkContext {
        NetworkContext::trivial(NOW)
    }

    fn buffer(channels: FlexrayChannel, slot_id: u16) -> FlexrayTxBufferConfig {
        FlexrayTxBufferConfig {
            channels,
            slot_id,
            offset: 0,
            repetition: 1,
            header_crc: 5,
            transmission_mode: FlexrayTransmissionMode::SingleShot,
        }
    }

    fn configured(buffers: Vec<FlexrayTxBufferConfig>) -> FlexrayController {
        let mut fr = FlexrayController::new("FlexRay1");
        fr.configure(
            FlexrayControllerConfig { key_slot_id: 40, coldstart: true, buffer_configs: buffers },
            ctx(),
        );
        fr
    }

    fn poc_states(actions: &[ControllerAction]) -> Vec<FlexrayPocState> {
        actions
            .iter()
            .filter_map(|a| match a {
                ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::PocStatus(s))) => {
                    Some(s.state)
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn trivial_poc_walks_to_normal_active() {
        let mut fr = FlexrayController::new("FlexRay1");
        let actions = fr.configure(
            FlexrayControllerConfig { key_slot_id: 40, coldstart: true, buffer_configs: vec![] },
            ctx(),
        );
        assert_eq!(poc_states(&actions), vec![FlexrayPocState::Ready]);

        let actions = fr.run(ctx());
        assert_eq!(poc_states(&actions), vec![FlexrayPocState::NormalActive]);
        let symbols = actions.iter().filter(|a| matches!(a, ControllerAction::Broadcast(_))).count();
        assert_eq!(symbols, 2);
    }

    #[test]
    fn halted_controller_ignores_requests() {
        let mut fr = configured(vec![buffer(FlexrayChannel::A, 40)]);
        fr.freeze(ctx());
        assert_eq!(fr.poc_state(), FlexrayPocState::Halt);
        assert!(fr.poc_status().freeze);

        let actions = fr.run(ctx());
        assert!(matches!(actions.as_slice(), [ControllerAction::Log(_)]));
        assert_eq!(fr.poc_state(), FlexrayPocState::Halt);

        let update = FlexrayTxBufferUpdate { tx_buffer_index: 0, payload_valid: true, payload: vec![1] };
        let actions = fr.update_tx_buffer(update, ctx()).unwrap();
        assert!(matches!(actions.as_slice(), [ControllerAction::Log(_)]));
    }

    #[test]
    fn buffer_update_is_sent_on_every_channel() {
        let mut fr = configured(vec![buffer(FlexrayChannel::AB, 40)]);
        let update =
            FlexrayTxBufferUpdate { tx_buffer_index: 0, payload_valid: true, payload: vec![7; 5] };
        let actions = fr.update_tx_buffer(update, ctx()).unwrap();

        let frames: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ControllerAction::Broadcast(PeerPayload::Event(NetworkEvent::FlexRay(
                    FlexrayEvent::Frame(e),
                ))) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].channel, FlexrayChannel::A);
        assert_eq!(frames[1].channel, FlexrayChannel::B);
        assert_eq!(frames[0].frame.header.frame_id, 40);
        assert_eq!(frames[0].frame.header.payload_length, 3);
    }

    #[test]
    fn unknown_buffer_is_an_error() {
        let mut fr = configured(vec![]);
        let update = FlexrayTxBufferUpdate { tx_buffer_index: 3, payload_valid: true, payload: vec![] };
        assert!(matches!(
            fr.update_tx_buffer(update, ctx()),
            Err(ControllerError::UnknownTxBuffer { index: 3, .. })
        ));
    }

    #[test]
    fn wakeup_symbol_reaches_wakeup_handlers_first() {
        let mut sender = configured(vec![]);
        let mut receiver = configured(vec![]);
        let actions = sender.wakeup(ctx());
        assert_eq!(poc_states(&actions), vec![FlexrayPocState::Wakeup, FlexrayPocState::Ready]);

        let ControllerAction::Broadcast(payload) = &actions[0] else {
            panic!("expected symbol broadcast, got {actions:?}");
        };
        let received = receiver.on_peer(payload);
        assert!(matches!(
            received.as_slice(),
            [
                ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::Wakeup(_))),
                ControllerAction::Deliver(NetworkEvent::FlexRay(FlexrayEvent::Symbol(_))),
            ]
        ));
    }

    #[test]
    fn simulated_poc_follows_simulator() {
        let mut fr = FlexrayController::new("FlexRay1");
        let actions = fr.run(NetworkContext::simulated(NOW));
        assert!(matches!(actions.as_slice(), [ControllerAction::Request(_)]));
        assert_eq!(fr.poc_state(), FlexrayPocState::DefaultConfig);

        let status = FlexrayPocStatusEvent {
            timestamp: NOW,
            state: FlexrayPocState::NormalActive,
            freeze: false,
            chi_halt_request: false,
            wakeup_status: FlexrayWakeupStatus::Undefined,
        };
        fr.on_simulated_event(NetworkEvent::FlexRay(FlexrayEvent::PocStatus(status)));
        assert_eq!(fr.poc_state(), FlexrayPocState::NormalActive);
    }
}
