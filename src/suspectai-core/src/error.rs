//! Error types for the game core.

use thiserror::Error;

use crate::participant::ParticipantId;
use crate::phase::GamePhase;

/// Why a ballot was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRejection {
    /// The ballot is closed or was never opened.
    #[error("ballot is closed")]
    Closed,
    /// The voter is not on the ballot (eliminated, disconnected, moderator).
    #[error("voter is not eligible")]
    NotEligible,
    #[error("voter already voted")]
    AlreadyVoted,
    #[error("cannot vote for yourself")]
    SelfVote,
    #[error("target is not a candidate")]
    InvalidTarget,
}

#[derive(Error, Debug)]
pub enum GameError {
    #[error("Invalid {kind} count: expected {min}-{max}, got {actual}")]
    InvalidParticipantCount {
        kind: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("{action} is not accepted during {phase}")]
    PhaseRejected {
        phase: GamePhase,
        action: &'static str,
    },

    #[error("No human seat in this game")]
    NoHuman,

    #[error("Vote rejected: {0}")]
    InvalidVote(#[from] VoteRejection),

    #[error("Illegal phase transition: {from} -> {to}")]
    IllegalTransition { from: GamePhase, to: GamePhase },

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Participant '{0}' returned an empty response")]
    EmptyResponse(String),

    #[error("Game loop has shut down")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_rejection_is_a_source_error() {
        let err = GameError::from(VoteRejection::SelfVote);
        assert_eq!(err.to_string(), "Vote rejected: cannot vote for yourself");

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("cannot vote for yourself"));
    }
}
