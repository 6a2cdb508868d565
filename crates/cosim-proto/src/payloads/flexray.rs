//! FlexRay requests and events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Channel(s) a buffer or frame uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlexrayChannel {
    /// No channel
    None,
    /// Channel A
    A,
    /// Channel B
    B,
    /// Both channels
    AB,
}

/// Protocol Operation Control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlexrayPocState {
    /// Power-on default
    #[default]
    DefaultConfig,
    /// Being configured
    Config,
    /// Configured, waiting for startup
    Ready,
    /// Wakeup in progress
    Wakeup,
    /// Startup in progress
    Startup,
    /// Synchronized, sending
    NormalActive,
    /// Synchronized, passive
    NormalPassive,
    /// Halted
    Halt,
}

/// Outcome of the last wakeup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlexrayWakeupStatus {
    /// No wakeup attempted
    #[default]
    Undefined,
    /// Wakeup pattern sent
    Transmitted,
    /// Another node woke the cluster
    ReceivedHeader,
    /// Wakeup collided
    CollisionHeader,
}

/// Host command sent to the communication controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlexrayHostCommand {
    /// Start communication
    Run,
    /// Halt at the end of the cycle
    DeferredHalt,
    /// Halt immediately
    Freeze,
    /// Permit coldstart
    AllowColdstart,
    /// Leave single-slot mode
    AllSlots,
    /// Send a wakeup pattern
    Wakeup,
}

/// How a transmit buffer sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlexrayTransmissionMode {
    /// Once per update
    SingleShot,
    /// Every matching cycle
    Continuous,
}

/// Configuration of one transmit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayTxBufferConfig {
    /// Channels the buffer sends on
    pub channels: FlexrayChannel,
    /// Static or dynamic slot id
    pub slot_id: u16,
    /// Base cycle offset
    pub offset: u8,
    /// Cycle repetition
    pub repetition: u8,
    /// Header CRC
    pub header_crc: u16,
    /// Transmission mode
    pub transmission_mode: FlexrayTransmissionMode,
}

/// Configuration a controller is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayControllerConfig {
    /// Slot used for startup/sync frames
    pub key_slot_id: u16,
    /// Node may coldstart the cluster
    pub coldstart: bool,
    /// Transmit buffers
    pub buffer_configs: Vec<FlexrayTxBufferConfig>,
}

/// Replace the configuration of one transmit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayTxBufferConfigUpdate {
    /// Buffer index
    pub tx_buffer_index: u16,
    /// New configuration
    pub config: FlexrayTxBufferConfig,
}

/// New payload for a transmit buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayTxBufferUpdate {
    /// Buffer index
    pub tx_buffer_index: u16,
    /// Whether the payload may be sent
    pub payload_valid: bool,
    /// Payload
    pub payload: Vec<u8>,
}

/// Requests a FlexRay controller can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlexrayRequest {
    /// Host command
    HostCommand(FlexrayHostCommand),
    /// Initial configuration
    ControllerConfig(FlexrayControllerConfig),
    /// Reconfigure a buffer
    TxBufferConfigUpdate(FlexrayTxBufferConfigUpdate),
    /// Update a buffer payload
    TxBufferUpdate(FlexrayTxBufferUpdate),
}

/// Header of a FlexRay frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayHeader {
    /// Frame id (slot)
    pub frame_id: u16,
    /// Payload length in 16-bit words
    pub payload_length: u8,
    /// Header CRC
    pub header_crc: u16,
    /// Cycle counter
    pub cycle_count: u8,
}

/// A FlexRay frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayFrame {
    /// Header
    pub header: FlexrayHeader,
    /// Payload
    pub payload: Vec<u8>,
}

/// Frame observed on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayFrameEvent {
    /// Simulation time
    pub timestamp: Duration,
    /// Channel
    pub channel: FlexrayChannel,
    /// The frame
    pub frame: FlexrayFrame,
}

/// Frame sent from a transmit buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayFrameTransmitEvent {
    /// Simulation time
    pub timestamp: Duration,
    /// Buffer the frame came from
    pub tx_buffer_index: u16,
    /// Channel
    pub channel: FlexrayChannel,
    /// The frame
    pub frame: FlexrayFrame,
}

/// Symbol pattern on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlexraySymbolPattern {
    /// Collision avoidance / media test symbol
    CasMts,
    /// Wakeup symbol
    Wus,
    /// Wakeup during operation pattern
    Wudop,
}

/// Symbol observed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexraySymbolEvent {
    /// Simulation time
    pub timestamp: Duration,
    /// Channel
    pub channel: FlexrayChannel,
    /// Pattern
    pub pattern: FlexraySymbolPattern,
}

/// Cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayCycleStartEvent {
    /// Simulation time
    pub timestamp: Duration,
    /// Cycle counter (0..=63)
    pub cycle_counter: u8,
}

/// POC status pushed by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexrayPocStatusEvent {
    /// Simulation time
    pub timestamp: Duration,
    /// New POC state
    pub state: FlexrayPocState,
    /// Controller entered freeze
    pub freeze: bool,
    /// Halt requested by the host
    pub chi_halt_request: bool,
    /// Outcome of the last wakeup
    pub wakeup_status: FlexrayWakeupStatus,
}

/// Events a FlexRay controller can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlexrayEvent {
    /// Frame received
    Frame(FlexrayFrameEvent),
    /// Frame transmitted
    FrameTransmit(FlexrayFrameTransmitEvent),
    /// Wakeup symbol received
    Wakeup(FlexraySymbolEvent),
    /// POC status changed
    PocStatus(FlexrayPocStatusEvent),
    /// Symbol received
    Symbol(FlexraySymbolEvent),
    /// Symbol transmitted
    SymbolTransmit(FlexraySymbolEvent),
    /// Cycle started
    CycleStart(FlexrayCycleStartEvent),
}
