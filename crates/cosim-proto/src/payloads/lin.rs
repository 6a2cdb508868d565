//! LIN requests and events.
//!
//! On the trivial path LIN nodes exchange their configuration and response
//! tables with each other, so most requests are also peer messages. A frame
//! transmission travels as a [`LinFrameStatusEvent`] carrying an `Rx` status;
//! every receiver derives its own status from its response table.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::TransmitDirection;

/// LIN frame identifier (0..=63).
pub type LinId = u8;

/// Number of valid LIN identifiers.
pub const MAX_LIN_ID: usize = 64;

/// Data length placeholder meaning "accept any length".
pub const DATA_LENGTH_UNKNOWN: u8 = 255;

/// Checksum model of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinChecksumModel {
    /// Accept any checksum model
    #[default]
    Unknown,
    /// LIN 2.x enhanced checksum
    Enhanced,
    /// LIN 1.x classic checksum
    Classic,
}

/// A LIN frame. `data` always holds eight bytes; `data_length` says how many
/// are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinFrame {
    /// Frame identifier
    pub id: LinId,
    /// Checksum model
    pub checksum_model: LinChecksumModel,
    /// Number of valid data bytes, or [`DATA_LENGTH_UNKNOWN`]
    pub data_length: u8,
    /// Payload
    pub data: [u8; 8],
}

impl LinFrame {
    /// Identifier of the go-to-sleep command frame.
    pub const GO_TO_SLEEP_ID: LinId = 0x3C;

    /// Frame with the given id and payload.
    #[must_use]
    pub fn new(id: LinId, checksum_model: LinChecksumModel, data_length: u8, data: [u8; 8]) -> Self {
        Self { id, checksum_model, data_length, data }
    }

    /// Frame id with no payload and unknown length (used for empty response
    /// slots).
    #[must_use]
    pub fn empty(id: LinId) -> Self {
        Self { id, checksum_model: LinChecksumModel::Unknown, data_length: 0, data: [0; 8] }
    }

    /// The master request frame that puts the cluster to sleep.
    #[must_use]
    pub fn go_to_sleep() -> Self {
        Self {
            id: Self::GO_TO_SLEEP_ID,
            checksum_model: LinChecksumModel::Classic,
            data_length: 8,
            data: [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        }
    }

    /// Whether this frame is the go-to-sleep command.
    #[must_use]
    pub fn is_go_to_sleep(&self) -> bool {
        let sleep = Self::go_to_sleep();
        self.id == sleep.id && self.data == sleep.data
    }
}

/// How a node treats a frame id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinFrameResponseMode {
    /// Ignore the frame
    #[default]
    Unused,
    /// Receive the frame
    Rx,
    /// Answer the header with the configured response
    TxUnconditional,
}

/// Entry of a node's response table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinFrameResponse {
    /// Frame sent or expected
    pub frame: LinFrame,
    /// How the node treats the id
    pub mode: LinFrameResponseMode,
}

/// Who provides the response when the master sends a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinFrameResponseType {
    /// The master answers its own header
    MasterResponse,
    /// A slave answers, the master receives
    SlaveResponse,
    /// A slave answers, another slave receives
    SlaveToSlave,
}

/// Role of a controller in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinControllerMode {
    /// Not initialized
    #[default]
    Inactive,
    /// Schedules headers
    Master,
    /// Answers headers
    Slave,
}

/// Operational status of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinControllerStatus {
    /// Not initialized
    #[default]
    Unknown,
    /// Normal operation
    Operational,
    /// Sleeping
    Sleep,
    /// Go-to-sleep issued, not yet confirmed
    SleepPending,
}

/// Status reported for a frame transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum LinFrameStatus {
    /// Not relevant for this node
    NOT_OK,
    /// Sent successfully
    LIN_TX_OK,
    /// Bus busy while sending
    LIN_TX_BUSY,
    /// Header error while sending
    LIN_TX_HEADER_ERROR,
    /// Error while sending
    LIN_TX_ERROR,
    /// Received successfully
    LIN_RX_OK,
    /// Bus busy while receiving
    LIN_RX_BUSY,
    /// Error while receiving
    LIN_RX_ERROR,
    /// No node answered the header
    LIN_RX_NO_RESPONSE,
}

impl LinFrameStatus {
    /// The status a transmitting node reports for a transmission that peers
    /// observed with `self`.
    #[must_use]
    pub fn to_tx(self) -> Self {
        match self {
            Self::LIN_RX_BUSY => Self::LIN_TX_BUSY,
            Self::LIN_RX_ERROR => Self::LIN_TX_ERROR,
            Self::LIN_RX_OK => Self::LIN_TX_OK,
            other => other,
        }
    }
}

/// Whether responses are configured up front or supplied per header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinSimulationMode {
    /// Static response table
    #[default]
    Default,
    /// Responses supplied at runtime via the frame header handler
    Dynamic,
}

/// Configuration a controller is initialized with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinControllerConfig {
    /// Master or slave
    pub mode: LinControllerMode,
    /// Baud rate
    pub baud_rate: u32,
    /// Initial response table
    pub frame_responses: Vec<LinFrameResponse>,
    /// Static or dynamic responses
    pub simulation_mode: LinSimulationMode,
}

/// Master request to transmit a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinSendFrameRequest {
    /// Frame to send
    pub frame: LinFrame,
    /// Who answers
    pub response_type: LinFrameResponseType,
}

/// Master request to send a header only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinSendFrameHeaderRequest {
    /// Simulation time of the header
    pub timestamp: Duration,
    /// Identifier of the header
    pub id: LinId,
}

/// Wakeup pulse on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinWakeupPulse {
    /// Simulation time of the pulse
    pub timestamp: Duration,
    /// Direction relative to the observer
    pub direction: TransmitDirection,
}

/// Requests a LIN controller can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinRequest {
    /// Master sends a complete frame
    Frame(LinSendFrameRequest),
    /// Master sends a header
    FrameHeader(LinSendFrameHeaderRequest),
    /// Wakeup pulse
    WakeupPulse(LinWakeupPulse),
    /// Controller initialized
    ControllerConfig(LinControllerConfig),
    /// Response table changed
    FrameResponseUpdate(Vec<LinFrameResponse>),
    /// Controller status changed
    ControllerStatusUpdate(LinControllerStatus),
}

/// A frame transmission as observed by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinFrameStatusEvent {
    /// Simulation time of the transmission
    pub timestamp: Duration,
    /// Transmitted frame
    pub frame: LinFrame,
    /// Status for the observing node
    pub status: LinFrameStatus,
}

/// A header observed by a dynamic-mode node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinFrameHeaderEvent {
    /// Simulation time of the header
    pub timestamp: Duration,
    /// Identifier of the header
    pub id: LinId,
}

/// Go-to-sleep command observed by a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinGoToSleepEvent {
    /// Simulation time of the command
    pub timestamp: Duration,
}

/// Wakeup pulse observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinWakeupEvent {
    /// Simulation time of the pulse
    pub timestamp: Duration,
    /// Direction relative to the observer
    pub direction: TransmitDirection,
}

/// Events a LIN controller can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinEvent {
    /// Frame transmission
    FrameStatus(LinFrameStatusEvent),
    /// Header (dynamic mode only)
    FrameHeader(LinFrameHeaderEvent),
    /// Go-to-sleep command
    GoToSleep(LinGoToSleepEvent),
    /// Wakeup pulse
    Wakeup(LinWakeupEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_to_sleep_frame_is_recognized() {
        assert!(LinFrame::go_to_sleep().is_go_to_sleep());
        assert!(!LinFrame::empty(LinFrame::GO_TO_SLEEP_ID).is_go_to_sleep());
    }

    #[test]
    fn rx_status_converts_to_tx() {
        assert_eq!(LinFrameStatus::LIN_RX_OK.to_tx(), LinFrameStatus::LIN_TX_OK);
        assert_eq!(LinFrameStatus::LIN_RX_ERROR.to_tx(), LinFrameStatus::LIN_TX_ERROR);
        assert_eq!(LinFrameStatus::LIN_RX_NO_RESPONSE.to_tx(), LinFrameStatus::LIN_RX_NO_RESPONSE);
    }
}
