//! Publish/subscribe data messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A message published on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessageEvent {
    /// Simulation time of publication
    pub timestamp: Duration,
    /// Topic the message was published on
    pub topic: String,
    /// Serialized user data
    pub data: Vec<u8>,
}
