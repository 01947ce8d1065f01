//! Participant identity for the two-party page lock

use crate::error::{ProtocolError, Result};
use crate::layout::FLAG_SLOTS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one protocol participant
///
/// The ID doubles as the participant's slot index in the flag bank, so it
/// must fit inside the bank. Construction is the only place the range is
/// checked; everything downstream can index without bounds concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub struct ParticipantId(u8);

impl ParticipantId {
    /// Validate a raw ID against the flag bank
    pub fn new(id: u8) -> Result<Self> {
        if (id as usize) < FLAG_SLOTS {
            Ok(Self(id))
        } else {
            Err(ProtocolError::InvalidParticipant {
                id,
                max: FLAG_SLOTS,
            })
        }
    }

    /// Raw ID value
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Slot index in the flag bank
    pub fn slot(&self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for ParticipantId {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl From<ParticipantId> for u8 {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated (local, peer) pairing
///
/// The two slots are always distinct: a pairing against oneself can never
/// be granted, so it is rejected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantPair {
    local: ParticipantId,
    peer: ParticipantId,
}

impl ParticipantPair {
    pub fn new(local: ParticipantId, peer: ParticipantId) -> Result<Self> {
        if local == peer {
            return Err(ProtocolError::IdenticalParticipants { id: local.get() });
        }
        Ok(Self { local, peer })
    }

    /// Validate both raw IDs and the pairing in one step
    pub fn from_raw(local: u8, peer: u8) -> Result<Self> {
        Self::new(ParticipantId::new(local)?, ParticipantId::new(peer)?)
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    pub fn peer(&self) -> ParticipantId {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_range() {
        assert!(ParticipantId::new(0).is_ok());
        assert!(ParticipantId::new(15).is_ok());

        let err = ParticipantId::new(16).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidParticipant { id: 16, max: 16 });
        assert!(ParticipantId::new(255).is_err());
    }

    #[test]
    fn test_slot_matches_id() {
        let id = ParticipantId::new(7).unwrap();
        assert_eq!(id.get(), 7);
        assert_eq!(id.slot(), 7);
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn test_deserialization_respects_the_slot_range() {
        let id: ParticipantId = serde_json::from_str("3").unwrap();
        assert_eq!(id, ParticipantId::new(3).unwrap());
        assert_eq!(serde_json::to_string(&id).unwrap(), "3");

        let err = serde_json::from_str::<ParticipantId>("16").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_pair_rejects_identical_sides() {
        let err = ParticipantPair::from_raw(4, 4).unwrap_err();
        assert_eq!(err, ProtocolError::IdenticalParticipants { id: 4 });
    }

    #[test]
    fn test_pair_from_raw_checks_both_sides() {
        assert!(ParticipantPair::from_raw(0, 1).is_ok());
        assert!(ParticipantPair::from_raw(0, 16).is_err());
        assert!(ParticipantPair::from_raw(16, 0).is_err());

        let pair = ParticipantPair::from_raw(5, 6).unwrap();
        assert_eq!(pair.local().get(), 5);
        assert_eq!(pair.peer().get(), 6);
    }
}
