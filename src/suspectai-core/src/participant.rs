//! Participant definitions.
//!
//! Every seat at the table: the human, the AI suspects and the moderator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable slot identifier, assigned from the roster order at game start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What kind of seat a participant occupies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    /// The single human player hiding among the AIs.
    Human,
    /// An AI-driven suspect.
    Ai,
    /// The moderator persona framing rounds and delivering the verdict.
    Moderator,
}

impl ParticipantKind {
    pub fn display_name(&self) -> &str {
        match self {
            ParticipantKind::Human => "HUMAN",
            ParticipantKind::Ai => "AI",
            ParticipantKind::Moderator => "MODERATOR",
        }
    }
}

/// A participant in the game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    /// Display name, also what other players address them by.
    pub name: String,
    pub kind: ParticipantKind,
    pub connected: bool,
    pub eliminated: bool,
    /// The LLM model backing an AI or moderator seat.
    pub model: Option<String>,
    /// Optional persona text appended to the system prompt.
    pub persona: Option<String>,
}

impl Participant {
    /// Create a disconnected, non-eliminated participant.
    pub fn new(id: ParticipantId, name: impl Into<String>, kind: ParticipantKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            connected: false,
            eliminated: false,
            model: None,
            persona: None,
        }
    }

    /// Set the model used for completions.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set a persona description.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Connected and still in the game.
    pub fn is_active(&self) -> bool {
        self.connected && !self.eliminated
    }

    pub fn is_ai(&self) -> bool {
        self.kind == ParticipantKind::Ai
    }

    pub fn is_human(&self) -> bool {
        self.kind == ParticipantKind::Human
    }

    pub fn is_moderator(&self) -> bool {
        self.kind == ParticipantKind::Moderator
    }

    /// Get the full display name with kind.
    pub fn display_name_with_kind(&self) -> String {
        format!("{} ({})", self.name, self.kind.display_name())
    }
}
