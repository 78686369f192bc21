//! Connection and elimination tracking for the fixed roster.

use crate::error::GameError;
use crate::participant::{Participant, ParticipantId, ParticipantKind};

pub const MIN_AI: usize = 3;
pub const MAX_AI: usize = 8;

#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    participants: Vec<Participant>,
}

impl ConnectionRegistry {
    /// Build the registry from the roster, validating its composition.
    ///
    /// The moderator is driven entirely by the AI collaborator and starts
    /// out connected; everyone else has to connect.
    pub fn new(mut participants: Vec<Participant>) -> Result<Self, GameError> {
        let count = |kind| participants.iter().filter(|p| p.kind == kind).count();

        let humans = count(ParticipantKind::Human);
        if humans > 1 {
            return Err(GameError::InvalidParticipantCount {
                kind: "human",
                min: 0,
                max: 1,
                actual: humans,
            });
        }
        let moderators = count(ParticipantKind::Moderator);
        if moderators != 1 {
            return Err(GameError::InvalidParticipantCount {
                kind: "moderator",
                min: 1,
                max: 1,
                actual: moderators,
            });
        }
        let ais = count(ParticipantKind::Ai);
        if !(MIN_AI..=MAX_AI).contains(&ais) {
            return Err(GameError::InvalidParticipantCount {
                kind: "AI",
                min: MIN_AI,
                max: MAX_AI,
                actual: ais,
            });
        }

        for (slot, p) in participants.iter_mut().enumerate() {
            p.id = ParticipantId(slot as u32);
            p.connected = p.is_moderator();
            p.eliminated = false;
        }

        Ok(Self { participants })
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    fn get_mut(&mut self, id: ParticipantId) -> Result<&mut Participant, GameError> {
        self.participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(GameError::UnknownParticipant(id))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn name_of(&self, id: ParticipantId) -> &str {
        self.get(id).map(|p| p.name.as_str()).unwrap_or("Someone")
    }

    /// Mark connected; returns whether the flag changed.
    pub fn connect(&mut self, id: ParticipantId) -> Result<bool, GameError> {
        let p = self.get_mut(id)?;
        let changed = !p.connected;
        p.connected = true;
        Ok(changed)
    }

    /// Mark disconnected; returns whether the flag changed.
    pub fn disconnect(&mut self, id: ParticipantId) -> Result<bool, GameError> {
        let p = self.get_mut(id)?;
        let changed = p.connected;
        p.connected = false;
        Ok(changed)
    }

    pub fn eliminate(&mut self, id: ParticipantId) -> Result<(), GameError> {
        self.get_mut(id)?.eliminated = true;
        Ok(())
    }

    pub fn is_active(&self, id: ParticipantId) -> bool {
        self.get(id).is_some_and(Participant::is_active)
    }

    pub fn human(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_human())
    }

    pub fn human_id(&self) -> Option<ParticipantId> {
        self.human().map(|p| p.id)
    }

    pub fn moderator(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_moderator())
    }

    pub fn moderator_id(&self) -> Option<ParticipantId> {
        self.moderator().map(|p| p.id)
    }

    /// Connected, non-eliminated AI suspects in roster order.
    pub fn active_ais(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.is_ai() && p.is_active())
            .map(|p| p.id)
            .collect()
    }

    /// Everyone who can vote and be voted for: active human and AIs.
    pub fn active_players(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| !p.is_moderator() && p.is_active())
            .map(|p| p.id)
            .collect()
    }

    /// AI suspects that have not been voted out, connected or not.
    pub fn remaining_ais(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.is_ai() && !p.eliminated)
            .map(|p| p.id)
            .collect()
    }

    /// `(id, name)` pairs of active players, for name matching.
    pub fn active_roster(&self) -> Vec<(ParticipantId, String)> {
        self.participants
            .iter()
            .filter(|p| !p.is_moderator() && p.is_active())
            .map(|p| (p.id, p.name.clone()))
            .collect()
    }

    pub fn connected_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.connected)
            .map(|p| p.id)
            .collect()
    }

    pub fn eliminated_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.eliminated)
            .map(|p| p.id)
            .collect()
    }

    /// Every non-moderator seat has connected.
    pub fn all_players_connected(&self) -> bool {
        self.participants
            .iter()
            .filter(|p| !p.is_moderator())
            .all(|p| p.connected)
    }

    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<ParticipantId> {
        let needle = name.trim();
        self.participants
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(needle))
            .map(|p| p.id)
    }
}
