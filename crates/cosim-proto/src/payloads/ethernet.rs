//! Ethernet requests and events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::{TransmitDirection, TransmitId};

/// Minimum Ethernet frame size without FCS; shorter frames are zero-padded on
/// reception.
pub const MIN_FRAME_SIZE: usize = 60;

/// A raw Ethernet frame (destination MAC onwards, without FCS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetFrame {
    /// Raw frame bytes
    pub raw: Vec<u8>,
}

impl EthernetFrame {
    /// Wrap raw bytes.
    #[must_use]
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self { raw: raw.into() }
    }

    /// Copy of the frame padded with zeros to [`MIN_FRAME_SIZE`].
    #[must_use]
    pub fn padded(&self) -> Self {
        let mut raw = self.raw.clone();
        if raw.len() < MIN_FRAME_SIZE {
            raw.resize(MIN_FRAME_SIZE, 0);
        }
        Self { raw }
    }
}

/// Link state of an Ethernet controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EthernetState {
    /// Controller deactivated
    #[default]
    Inactive,
    /// Activated, no link
    LinkDown,
    /// Activated with link
    LinkUp,
}

/// Requested controller mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EthernetControllerMode {
    /// Deactivate
    Inactive,
    /// Activate
    Active,
}

/// Outcome of a frame transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EthernetTransmitStatus {
    /// Frame was transmitted
    Transmitted,
    /// Controller is not active
    ControllerInactive,
    /// Link is down
    LinkDown,
    /// Frame was dropped
    Dropped,
    /// Frame is malformed
    InvalidFrameFormat,
}

/// Request to send a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetFrameRequest {
    /// Frame to send
    pub frame: EthernetFrame,
    /// Token echoed in the transmit event
    pub transmit_id: TransmitId,
    /// Opaque value echoed in frame and transmit events
    pub user_context: Option<u64>,
}

/// Requests an Ethernet controller can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EthernetRequest {
    /// Activate or deactivate the controller
    SetControllerMode(EthernetControllerMode),
    /// Send a frame
    Frame(EthernetFrameRequest),
}

/// A frame observed on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetFrameEvent {
    /// Simulation time of the observation
    pub timestamp: Duration,
    /// The frame
    pub frame: EthernetFrame,
    /// Direction relative to the receiving controller
    pub direction: TransmitDirection,
    /// User context of the sender's request
    pub user_context: Option<u64>,
}

/// Acknowledgement of a transmission, delivered to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetFrameTransmitEvent {
    /// Simulation time of the acknowledgement
    pub timestamp: Duration,
    /// Outcome
    pub status: EthernetTransmitStatus,
    /// Token returned when the frame was sent
    pub transmit_id: TransmitId,
    /// User context of the request
    pub user_context: Option<u64>,
}

/// Link state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetStateChangeEvent {
    /// Simulation time of the change
    pub timestamp: Duration,
    /// New link state
    pub state: EthernetState,
}

/// Link bit rate changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetBitrateChangeEvent {
    /// Simulation time of the change
    pub timestamp: Duration,
    /// New bit rate in kbit/s
    pub bitrate: u32,
}

/// Events an Ethernet controller can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EthernetEvent {
    /// Frame observed
    Frame(EthernetFrameEvent),
    /// Transmission acknowledged
    FrameTransmit(EthernetFrameTransmitEvent),
    /// Link state changed
    StateChange(EthernetStateChangeEvent),
    /// Bit rate changed
    BitrateChange(EthernetBitrateChangeEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frames_are_padded() {
        let frame = EthernetFrame::new(vec![1, 2, 3]);
        let padded = frame.padded();
        assert_eq!(padded.raw.len(), MIN_FRAME_SIZE);
        assert_eq!(&padded.raw[..3], &[1, 2, 3]);
        assert!(padded.raw[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn long_frames_are_untouched() {
        let frame = EthernetFrame::new(vec![7; 100]);
        assert_eq!(frame.padded(), frame);
    }
}
