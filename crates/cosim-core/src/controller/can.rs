//! CAN controller.

use cosim_proto::{
    NetworkEvent, NetworkRequest, PeerPayload, TransmitDirection, TransmitId,
    payloads::can::{
        CanConfigureBaudrate, CanControllerState, CanErrorState, CanEvent, CanFrame,
        CanFrameEvent, CanFrameRequest, CanFrameTransmitEvent, CanRequest, CanSetControllerMode,
        CanStateChangeEvent, CanTransmitStatus,
    },
};

use super::{ControllerAction, NetworkContext};
use crate::log::LogRecord;

/// A CAN controller.
#[derive(Debug, Clone)]
pub struct CanController {
    name: String,
    state: CanControllerState,
    error_state: CanErrorState,
    baud_rate: Option<CanConfigureBaudrate>,
    next_transmit_id: u64,
}

impl CanController {
    /// Uninitialized controller.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CanControllerState::Uninit,
            error_state: CanErrorState::NotAvailable,
            baud_rate: None,
            next_transmit_id: 0,
        }
    }

    /// Controller state.
    pub fn state(&self) -> CanControllerState {
        self.state
    }

    /// Error state as last reported by the network simulator.
    pub fn error_state(&self) -> CanErrorState {
        self.error_state
    }

    /// Configured bit rates.
    pub fn baud_rate(&self) -> Option<CanConfigureBaudrate> {
        self.baud_rate
    }

    /// Configure bit rates.
    pub fn set_baud_rate(
        &mut self,
        rate: u32,
        fd_rate: u32,
        xl_rate: u32,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        let baud_rate = CanConfigureBaudrate { rate, fd_rate, xl_rate };
        self.baud_rate = Some(baud_rate);
        if ctx.is_simulated() {
            vec![request(CanRequest::SetBaudrate(baud_rate))]
        } else {
            Vec::new()
        }
    }

    /// Start the controller.
    pub fn start(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.change_mode(CanControllerState::Started, false, false, ctx)
    }

    /// Stop the controller.
    pub fn stop(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.change_mode(CanControllerState::Stopped, false, false, ctx)
    }

    /// Reset the controller to `Uninit`.
    pub fn reset(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.change_mode(CanControllerState::Uninit, true, true, ctx)
    }

    /// Put the controller to sleep.
    pub fn sleep(&mut self, ctx: NetworkContext) -> Vec<ControllerAction> {
        self.change_mode(CanControllerState::Sleep, false, false, ctx)
    }

    fn change_mode(
        &mut self,
        mode: CanControllerState,
        reset_error_handling: bool,
        cancel_transmit_requests: bool,
        ctx: NetworkContext,
    ) -> Vec<ControllerAction> {
        if ctx.is_simulated() {
            // The simulator reports the resulting state.
            return vec![request(CanRequest::SetControllerMode(CanSetControllerMode {
                reset_error_handling,
                cancel_transmit_requests,
                mode,
            }))];
        }

        if self.state == mode {
            return Vec::new();
        }
        self.state = mode;
        vec![ControllerAction::Deliver(NetworkEvent::Can(CanEvent::StateChange(
            CanStateChangeEvent { timestamp: ctx.now, state: mode },
        )))]
    }

    /// Send a frame. Returns the transmit id echoed in the acknowledgement.
    ///
    /// On a trivial network the frame reaches every other controller as an
    /// `Rx` frame, the sender's own `Tx` frame handlers, and a `Transmitted`
    /// acknowledgement, in that order. A controller that is not started drops
    /// the frame.
    pub fn send_frame(
        &mut self,
        frame: CanFrame,
        user_context: Option<u64>,
        ctx: NetworkContext,
    ) -> (TransmitId, Vec<ControllerAction>) {
        let transmit_id = TransmitId(self.next_transmit_id);
        self.next_transmit_id += 1;

        if ctx.is_simulated() {
            let actions = vec![request(CanRequest::Frame(CanFrameRequest {
                frame,
                transmit_id,
                user_context,
            }))];
            return (transmit_id, actions);
        }

        if self.state != CanControllerState::Started {
            let actions = vec![ControllerAction::Log(LogRecord::warn(format!(
                "CAN controller '{}' dropped frame {:#x}: controller is {:?}, not Started",
                self.name, frame.can_id, self.state
            )))];
            return (transmit_id, actions);
        }

        let can_id = frame.can_id;
        let frame_event = |frame, direction| CanFrameEvent {
            timestamp: ctx.now,
            frame,
            direction,
            user_context,
        };
        let actions = vec![
            ControllerAction::Broadcast(PeerPayload::Event(NetworkEvent::Can(CanEvent::Frame(
                frame_event(frame.clone(), TransmitDirection::Rx),
            )))),
            ControllerAction::Deliver(NetworkEvent::Can(CanEvent::Frame(frame_event(
                frame,
                TransmitDirection::Tx,
            )))),
            ControllerAction::Deliver(NetworkEvent::Can(CanEvent::FrameTransmit(
                CanFrameTransmitEvent {
                    timestamp: ctx.now,
                    can_id,
                    status: CanTransmitStatus::Transmitted,
                    transmit_id,
                    user_context,
                },
            ))),
        ];
        (transmit_id, actions)
    }

    pub(super) fn on_peer(&mut self, payload: &PeerPayload) -> Vec<ControllerAction> {
        match payload {
            PeerPayload::Event(event @ NetworkEvent::Can(CanEvent::Frame(_))) => {
                vec![ControllerAction::Deliver(event.clone())]
            },
            _ => Vec::new(),
        }
    }

    pub(super) fn on_simulated_event(&mut self, event: NetworkEvent) -> Vec<ControllerAction> {
        match &event {
            NetworkEvent::Can(CanEvent::StateChange(e)) => self.state = e.state,
            NetworkEvent::Can(CanEvent::ErrorStateChange(e)) => self.error_state = e.error_state,
            NetworkEvent::Can(_) => {},
            _ => {
                return vec![ControllerAction::Log(LogRecord::warn(format!(
                    "CAN controller '{}' received a {} event",
                    self.name,
                    event.kind()
                )))];
            },
        }
        vec![ControllerAction::Deliver(event)]
    }
}

fn request(request: CanRequest) -> ControllerAction {
    ControllerAction::Request(NetworkRequest::Can(request))
}
