//! Ethernet controller.

use cosim_proto::{
    NetworkEvent, NetworkRequest, PeerPayload, TransmitDirection, TransmitId,
    payloads::ethernet::{
        EthernetControllerMode, EthernetEvent, EthernetFrame, EthernetFrameEvent,
        EthernetFrameRequest, EthernetFrameTransmitEvent, EthernetRequest, EthernetState,
        EthernetStateChangeEvent, EthernetTransmitStatus,
    },
};

use super::{ControllerAction, NetworkContext};
use crate::log::LogRecord;

/// An Ethernet controller.
#[derive(Debug, Clone)]
pub struct EthernetController {
    name: String,
    state: EthernetState,
    bitrate: u32,
    next_transmit_id: u64,
}

impl EthernetController {
    /// Inactive controller.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: EthernetState::Inactive, bitrate: 0, next_transmit_id: 0 }
    }

    /// Link state.
    pub fn state(&self) -> EthernetState {
        self.state
    }

    /// Link bit rate in kbit/s as last reported, zero if unknown.
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    /// Activate the controller. A trivial network brings the link up at once.
    pub fn activate(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.set_mode(EthernetControllerMode::Active, EthernetState::LinkUp, ctx)
    }

    /// Deactivate the controller.
    pub fn deactivate(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.set_mode(EthernetControllerMode::Inactive, EthernetState::Inactive, ctx)
    }

    fn set_mode(
        &mut self,
        mode: EthernetControllerMode,
        trivial_state: EthernetState,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        if ctx.is_simulated() {
            return vec![ControllerAction::Request(NetworkRequest::Ethernet(
                EthernetRequest::SetControllerMode(mode),
            ))];
        }
        if self.state == trivial_state {
            return Vec::new();
        }
        self.state = trivial_state;
        vec![ControllerAction::Deliver(NetworkEvent::Ethernet(EthernetEvent::StateChange(
            EthernetStateChangeEvent { timestamp: ctx.now, state: trivial_state },
        )))]
    }

    /// Send a raw frame. Returns the transmit id echoed in the
    /// acknowledgement.
    ///
    /// On a trivial network an inactive controller answers with a
    /// `ControllerInactive` acknowledgement and sends nothing.
    pub fn send_frame(
        &mut self,
        frame: EthernetFrame,
        user_context: Option<u64>,
        ctx: NetworkContext,
    ) -> (TransmitId, Vec<ControllerAction>) {
        let transmit_id = TransmitId(self.next_transmit_id);
        self.next_transmit_id += 1;

        if ctx.is_simulated() {
            let actions = vec![ControllerAction::Request(NetworkRequest::Ethernet(
                EthernetRequest::Frame(EthernetFrameRequest { frame, transmit_id, user_context }),
            ))];
            return (transmit_id, actions);
        }

        let ack = |status| {
            ControllerAction::Deliver(NetworkEvent::Ethernet(EthernetEvent::FrameTransmit(
                EthernetFrameTransmitEvent { timestamp: ctx.now, status, transmit_id, user_context },
            )))
        };

        let status = match self.state {
            EthernetState::LinkUp => EthernetTransmitStatus::Transmitted,
            EthernetState::LinkDown => EthernetTransmitStatus::LinkDown,
            EthernetState::Inactive => EthernetTransmitStatus::ControllerInactive,
        };
        if status != EthernetTransmitStatus::Transmitted {
            let actions = vec![
                ControllerAction::Log(LogRecord::warn(format!(
                    "Ethernet controller '{}' cannot send in state {:?}",
                    self.name, self.state
                ))),
                ack(status),
            ];
            return (transmit_id, actions);
        }

        let frame_event = |frame, direction| {
            NetworkEvent::Ethernet(EthernetEvent::Frame(EthernetFrameEvent {
                timestamp: ctx.now,
                frame,
                direction,
                user_context,
            }))
        };
        let actions = vec![
            ControllerAction::Broadcast(PeerPayload::Event(frame_event(
                frame.clone(),
                TransmitDirection::Rx,
            ))),
            ControllerAction::Deliver(frame_event(frame, TransmitDirection::Tx)),
            ack(EthernetTransmitStatus::Transmitted),
        ];
        (transmit_id, actions)
    }

    pub(super) fn on_peer(&mut self, payload: &PeerPayload) -> Vec<ControllerAction> {
        match payload {
            PeerPayload::Event(NetworkEvent::Ethernet(EthernetEvent::Frame(e))) => {
                vec![ControllerAction::Deliver(padded(e))]
            },
            _ => Vec::new(),
        }
    }

    pub(super) fn on_simulated_event(&mut self, event: NetworkEvent) -> Vec<ControllerAction> {
        match event {
            NetworkEvent::Ethernet(EthernetEvent::Frame(e)) => {
                vec![ControllerAction::Deliver(padded(&e))]
            },
            NetworkEvent::Ethernet(EthernetEvent::StateChange(e)) => {
                self.state = e.state;
                vec![ControllerAction::Deliver(NetworkEvent::Ethernet(EthernetEvent::StateChange(e)))]
            },
            NetworkEvent::Ethernet(EthernetEvent::BitrateChange(e)) => {
                self.bitrate = e.bitrate;
                vec![ControllerAction::Deliver(NetworkEvent::Ethernet(
                    EthernetEvent::BitrateChange(e),
                ))]
            },
            event @ NetworkEvent::Ethernet(EthernetEvent::FrameTransmit(_)) => {
                vec![ControllerAction::Deliver(event)]
            },
            other => vec![ControllerAction::Log(LogRecord::warn(format!(
                "Ethernet controller '{}' received a {} event",
                self.name,
                other.kind()
            )))],
        }
    }
}

fn padded(event: &EthernetFrameEvent) -> NetworkEvent {
    NetworkEvent::Ethernet(EthernetEvent::Frame(EthernetFrameEvent {
        frame: event.frame.padded(),
        ..event.clone()
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cosim_proto::payloads::ethernet::MIN_FRAME_SIZE;

    use super::*;

    const NOW: Duration = Duration::from_millis(1);

    #[test]
    fn inactive_send_is_nacked() {
        let mut eth = EthernetController::new("ETH0");
        let (transmit_id, actions) =
            eth.send_frame(EthernetFrame::new(vec![1; 20]), None, NetworkContext::trivial(NOW));
        let Some(ControllerAction::Deliver(NetworkEvent::Ethernet(EthernetEvent::FrameTransmit(ack)))) =
            actions.last()
        else {
            panic!("expected ack, got {actions:?}");
        };
        assert_eq!(ack.status, EthernetTransmitStatus::ControllerInactive);
        assert_eq!(ack.transmit_id, transmit_id);
        assert!(!actions.iter().any(|a| matches!(a, ControllerAction::Broadcast(_))));
    }

    #[test]
    fn activation_brings_link_up() {
        let mut eth = EthernetController::new("ETH0");
        let actions = eth.activate(NetworkContext::trivial(NOW));
        assert_eq!(eth.state(), EthernetState::LinkUp);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn received_short_frames_are_padded() {
        let mut sender = EthernetController::new("ETH0");
        let mut receiver = EthernetController::new("ETH0");
        let ctx = NetworkContext::trivial(NOW);
        sender.activate(ctx);

        let (_, actions) = sender.send_frame(EthernetFrame::new(vec![0xAB; 14]), None, ctx);
        let ControllerAction::Broadcast(payload) = &actions[0] else {
            panic!("expected broadcast");
        };
        let delivered = receiver.on_peer(payload);
        let [ControllerAction::Deliver(NetworkEvent::Ethernet(EthernetEvent::Frame(e)))] =
            delivered.as_slice()
        else {
            panic!("expected frame delivery, got {delivered:?}");
        };
        assert_eq!(e.frame.raw.len(), MIN_FRAME_SIZE);
        assert_eq!(e.direction, TransmitDirection::Rx);
    }
}
