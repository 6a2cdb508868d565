//! CAN requests and events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::{TransmitDirection, TransmitId};

/// A CAN (classic, FD or XL) frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// Frame identifier (11 or 29 bit)
    pub can_id: u32,
    /// Bitwise OR of the `FLAG_*` constants
    pub flags: u32,
    /// Data length code
    pub dlc: u16,
    /// SDU type (CAN XL)
    pub sdt: u8,
    /// Virtual CAN network id (CAN XL)
    pub vcid: u8,
    /// Acceptance field (CAN XL)
    pub af: u32,
    /// Payload
    pub data: Vec<u8>,
}

impl CanFrame {
    /// Identifier extension (29-bit id)
    pub const FLAG_IDE: u32 = 1 << 9;
    /// Remote transmission request
    pub const FLAG_RTR: u32 = 1 << 4;
    /// FD format indicator
    pub const FLAG_FDF: u32 = 1 << 12;
    /// Bit rate switch (FD)
    pub const FLAG_BRS: u32 = 1 << 13;
    /// Error state indicator (FD)
    pub const FLAG_ESI: u32 = 1 << 14;
    /// XL format indicator
    pub const FLAG_XLF: u32 = 1 << 15;

    /// Classic frame with `dlc` derived from the payload length.
    #[must_use]
    pub fn new(can_id: u32, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self { can_id, flags: 0, dlc: data.len() as u16, sdt: 0, vcid: 0, af: 0, data }
    }
}

/// Controller state of a CAN controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CanControllerState {
    /// Not configured
    #[default]
    Uninit,
    /// Configured but not participating
    Stopped,
    /// Participating in bus traffic
    Started,
    /// Low-power mode
    Sleep,
}

/// Fault-confinement state of a CAN controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CanErrorState {
    /// Not reported by the simulation
    #[default]
    NotAvailable,
    /// Normal operation
    ErrorActive,
    /// Error passive
    ErrorPassive,
    /// Disconnected from the bus
    BusOff,
}

/// Outcome of a frame transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanTransmitStatus {
    /// Frame was put on the bus
    Transmitted,
    /// Transmission was cancelled
    Canceled,
    /// Transmit queue overflow
    TransmitQueueFull,
}

/// Request to change the controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanSetControllerMode {
    /// Reset the error counters
    pub reset_error_handling: bool,
    /// Drop pending transmit requests
    pub cancel_transmit_requests: bool,
    /// Requested state
    pub mode: CanControllerState,
}

/// Request to configure bit rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanConfigureBaudrate {
    /// Arbitration bit rate
    pub rate: u32,
    /// FD data bit rate
    pub fd_rate: u32,
    /// XL data bit rate
    pub xl_rate: u32,
}

/// Request to send a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrameRequest {
    /// Frame to send
    pub frame: CanFrame,
    /// Token echoed in the transmit event
    pub transmit_id: TransmitId,
    /// Opaque value echoed in frame and transmit events
    pub user_context: Option<u64>,
}

/// Requests a CAN controller can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanRequest {
    /// Change controller state
    SetControllerMode(CanSetControllerMode),
    /// Configure bit rates
    SetBaudrate(CanConfigureBaudrate),
    /// Send a frame
    Frame(CanFrameRequest),
}

/// A frame observed on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrameEvent {
    /// Simulation time of the observation
    pub timestamp: Duration,
    /// The frame
    pub frame: CanFrame,
    /// Direction relative to the receiving controller
    pub direction: TransmitDirection,
    /// User context of the sender's request
    pub user_context: Option<u64>,
}

/// Acknowledgement of a transmission, delivered to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrameTransmitEvent {
    /// Simulation time of the acknowledgement
    pub timestamp: Duration,
    /// Identifier of the transmitted frame
    pub can_id: u32,
    /// Outcome
    pub status: CanTransmitStatus,
    /// Token returned when the frame was sent
    pub transmit_id: TransmitId,
    /// User context of the request
    pub user_context: Option<u64>,
}

/// Controller state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanStateChangeEvent {
    /// Simulation time of the change
    pub timestamp: Duration,
    /// New state
    pub state: CanControllerState,
}

/// Error state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanErrorStateChangeEvent {
    /// Simulation time of the change
    pub timestamp: Duration,
    /// New error state
    pub error_state: CanErrorState,
}

/// Events a CAN controller can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanEvent {
    /// Frame observed
    Frame(CanFrameEvent),
    /// Transmission acknowledged
    FrameTransmit(CanFrameTransmitEvent),
    /// Controller state changed
    StateChange(CanStateChangeEvent),
    /// Error state changed
    ErrorStateChange(CanErrorStateChangeEvent),
}

impl CanEvent {
    /// Simulation time carried by the event.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        match self {
            Self::Frame(e) => e.timestamp,
            Self::FrameTransmit(e) => e.timestamp,
            Self::StateChange(e) => e.timestamp,
            Self::ErrorStateChange(e) => e.timestamp,
        }
    }
}
