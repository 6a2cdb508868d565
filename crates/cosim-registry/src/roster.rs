//! Participant roster: who is connected under which name and id.
//!
//! Ids are handed out from 1 upwards and never reused within one hub run, so
//! a late envelope for a departed participant can never reach its successor.
//! Iteration is in id order, which is also join order.

use std::collections::{BTreeMap, HashMap};

use cosim_proto::ParticipantId;

use crate::error::RosterError;

/// One registered participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Assigned bus id
    pub participant: ParticipantId,
    /// Name from the participant's hello
    pub name: String,
    /// Transport connection the participant speaks on
    pub connection: u64,
}

/// Registered participants, indexed by id, name and connection.
#[derive(Debug)]
pub struct Roster {
    entries: BTreeMap<ParticipantId, RosterEntry>,
    by_name: HashMap<String, ParticipantId>,
    by_connection: HashMap<u64, ParticipantId>,
    next_id: u64,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    /// Empty roster. The first participant gets id 1.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_name: HashMap::new(),
            by_connection: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register `name` on `connection` and assign the next id.
    ///
    /// # Errors
    ///
    /// - `RosterError::EmptyName` for an empty name
    /// - `RosterError::AlreadyRegistered` if the connection said hello before
    /// - `RosterError::NameTaken` if another participant uses the name
    pub fn register(&mut self, connection: u64, name: &str) -> Result<ParticipantId, RosterError> {
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        if let Some(&participant) = self.by_connection.get(&connection) {
            return Err(RosterError::AlreadyRegistered { connection, participant });
        }
        if let Some(&holder) = self.by_name.get(name) {
            return Err(RosterError::NameTaken { name: name.to_string(), holder });
        }

        let participant = ParticipantId(self.next_id);
        self.next_id += 1;
        self.entries
            .insert(participant, RosterEntry { participant, name: name.to_string(), connection });
        self.by_name.insert(name.to_string(), participant);
        self.by_connection.insert(connection, participant);
        Ok(participant)
    }

    /// Remove whoever is registered on `connection`.
    pub fn unregister_connection(&mut self, connection: u64) -> Option<RosterEntry> {
        let participant = self.by_connection.remove(&connection)?;
        let entry = self.entries.remove(&participant)?;
        self.by_name.remove(&entry.name);
        Some(entry)
    }

    /// Participant registered on `connection`.
    pub fn participant_on(&self, connection: u64) -> Option<ParticipantId> {
        self.by_connection.get(&connection).copied()
    }

    /// Entry of `participant`.
    pub fn get(&self, participant: ParticipantId) -> Option<&RosterEntry> {
        self.entries.get(&participant)
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    /// Number of registered participants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
