//! Per-participant controller arena.
//!
//! Controllers live in a slot vector and are addressed by a
//! [`ControllerHandle`] of slot index plus generation. Removing a controller
//! bumps the slot's generation, so an old handle can never reach a newer
//! controller that reused the slot.
//!
//! The registry also enforces the two naming rules of a participant:
//! controller names are unique, and every controller on a network speaks the
//! same protocol.

use std::collections::HashMap;

use cosim_proto::{
    ControllerDescriptor, ControllerHandle, ControllerInfo, NetworkKind, ParticipantId,
};

use crate::error::RegistryError;

/// A registered controller with its addressing data.
#[derive(Debug, Clone)]
pub struct ControllerEntry<T> {
    /// Controller name, unique within the participant
    pub name: String,
    /// Network the controller is attached to
    pub network: String,
    /// Protocol of the controller
    pub kind: NetworkKind,
    /// Controller state owned by the caller
    pub value: T,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    entry: Option<ControllerEntry<T>>,
}

/// Generation-checked controller arena of one participant.
#[derive(Debug, Clone)]
pub struct ControllerRegistry<T> {
    participant: ParticipantId,
    participant_name: String,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    /// Network name -> (kind, number of local controllers on it)
    networks: HashMap<String, (NetworkKind, usize)>,
}

impl<T> ControllerRegistry<T> {
    /// Empty registry for `participant`.
    pub fn new(participant: ParticipantId, participant_name: impl Into<String>) -> Self {
        Self {
            participant,
            participant_name: participant_name.into(),
            slots: Vec::new(),
            free: Vec::new(),
            networks: HashMap::new(),
        }
    }

    /// Owning participant.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Register a controller.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateControllerName` if `name` is taken
    /// - `RegistryError::NetworkKindMismatch` if `network` already carries
    ///   another protocol
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        network: impl Into<String>,
        kind: NetworkKind,
        value: T,
    ) -> Result<ControllerHandle, RegistryError> {
        let name = name.into();
        let network = network.into();

        if self.find_by_name(&name).is_some() {
            return Err(RegistryError::DuplicateControllerName { name });
        }
        if let Some(&(existing, _)) = self.networks.get(&network)
            && existing != kind
        {
            return Err(RegistryError::NetworkKindMismatch { network, existing, requested: kind });
        }

        self.networks.entry(network.clone()).or_insert((kind, 0)).1 += 1;
        let entry = ControllerEntry { name, network, kind, value };

        if let Some(index) = self.free.pop()
            && let Some(slot) = self.slots.get_mut(index as usize)
        {
            slot.entry = Some(entry);
            return Ok(ControllerHandle::new(index, slot.generation));
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, entry: Some(entry) });
        Ok(ControllerHandle::new(index, 0))
    }

    /// Controller behind `handle`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::StaleHandle` if the controller was removed
    pub fn get(&self, handle: ControllerHandle) -> Result<&ControllerEntry<T>, RegistryError> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(RegistryError::StaleHandle(handle))
    }

    /// Mutable controller behind `handle`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::StaleHandle` if the controller was removed
    pub fn get_mut(
        &mut self,
        handle: ControllerHandle,
    ) -> Result<&mut ControllerEntry<T>, RegistryError> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(RegistryError::StaleHandle(handle))
    }

    /// Remove a controller and invalidate its handle.
    ///
    /// # Errors
    ///
    /// - `RegistryError::StaleHandle` if the controller was already removed
    pub fn remove(&mut self, handle: ControllerHandle) -> Result<ControllerEntry<T>, RegistryError> {
        let slot = self
            .slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .ok_or(RegistryError::StaleHandle(handle))?;
        let entry = slot.entry.take().ok_or(RegistryError::StaleHandle(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());

        if let Some((_, count)) = self.networks.get_mut(&entry.network) {
            *count -= 1;
            if *count == 0 {
                self.networks.remove(&entry.network);
            }
        }
        Ok(entry)
    }

    /// Globally unique descriptor of a local controller.
    pub fn descriptor(&self, handle: ControllerHandle) -> ControllerDescriptor {
        ControllerDescriptor::new(self.participant, handle)
    }

    /// Announcement for a live controller.
    ///
    /// # Errors
    ///
    /// - `RegistryError::StaleHandle` if the controller was removed
    pub fn info(&self, handle: ControllerHandle) -> Result<ControllerInfo, RegistryError> {
        let entry = self.get(handle)?;
        Ok(self.info_for(handle, entry))
    }

    /// Announcements for every live controller, in slot order.
    pub fn infos(&self) -> Vec<ControllerInfo> {
        self.iter().map(|(handle, entry)| self.info_for(handle, entry)).collect()
    }

    fn info_for(&self, handle: ControllerHandle, entry: &ControllerEntry<T>) -> ControllerInfo {
        ControllerInfo {
            descriptor: self.descriptor(handle),
            participant_name: self.participant_name.clone(),
            controller_name: entry.name.clone(),
            network: entry.network.clone(),
            kind: entry.kind,
        }
    }

    /// Local controllers attached to `network`, in slot order.
    pub fn on_network(&self, network: &str) -> Vec<ControllerHandle> {
        self.iter()
            .filter(|(_, entry)| entry.network == network)
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Protocol of `network` if a local controller is attached to it.
    pub fn network_kind(&self, network: &str) -> Option<NetworkKind> {
        self.networks.get(network).map(|&(kind, _)| kind)
    }

    /// Handle of the controller called `name`.
    pub fn find_by_name(&self, name: &str) -> Option<ControllerHandle> {
        self.iter().find(|(_, entry)| entry.name == name).map(|(handle, _)| handle)
    }

    /// Number of live controllers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    /// Whether no controller is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live controllers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ControllerHandle, &ControllerEntry<T>)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .map(|entry| (ControllerHandle::new(index as u32, slot.generation), entry))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ControllerRegistry<u8> {
        ControllerRegistry::new(ParticipantId(7), "CanWriter")
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = registry();
        reg.insert("CAN1", "CAN1", NetworkKind::Can, 0).unwrap();
        let err = reg.insert("CAN1", "CAN2", NetworkKind::Can, 1).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateControllerName { name: "CAN1".to_string() });
    }

    #[test]
    fn network_protocol_must_agree() {
        let mut reg = registry();
        reg.insert("CAN1", "Bus", NetworkKind::Can, 0).unwrap();
        let err = reg.insert("LIN1", "Bus", NetworkKind::Lin, 1).unwrap_err();
        assert!(matches!(err, RegistryError::NetworkKindMismatch { .. }));
    }

    #[test]
    fn removed_handles_go_stale() {
        let mut reg = registry();
        let old = reg.insert("CAN1", "CAN1", NetworkKind::Can, 0).unwrap();
        reg.remove(old).unwrap();

        let new = reg.insert("CAN2", "CAN1", NetworkKind::Can, 1).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert_eq!(reg.get(old).unwrap_err(), RegistryError::StaleHandle(old));
        assert_eq!(reg.get(new).unwrap().value, 1);
        assert!(reg.remove(old).is_err());
    }

    #[test]
    fn network_kind_is_released_with_last_controller() {
        let mut reg = registry();
        let can = reg.insert("CAN1", "Bus", NetworkKind::Can, 0).unwrap();
        assert_eq!(reg.network_kind("Bus"), Some(NetworkKind::Can));
        reg.remove(can).unwrap();
        assert_eq!(reg.network_kind("Bus"), None);
        assert!(reg.insert("LIN1", "Bus", NetworkKind::Lin, 1).is_ok());
    }

    #[test]
    fn infos_carry_descriptor_and_names() {
        let mut reg = registry();
        let handle = reg.insert("ETH0", "Eth1", NetworkKind::Ethernet, 0).unwrap();
        let info = reg.info(handle).unwrap();
        assert_eq!(info.descriptor, ControllerDescriptor::new(ParticipantId(7), handle));
        assert_eq!(info.participant_name, "CanWriter");
        assert_eq!(info.network, "Eth1");
        assert_eq!(reg.infos(), vec![info]);
        assert_eq!(reg.on_network("Eth1"), vec![handle]);
        assert_eq!(reg.find_by_name("ETH0"), Some(handle));
    }
}
