//! Inbound events, outbound effects and the broadcast snapshot.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio_queue::PlaybackItem;
use crate::conversation::ConversationEntry;
use crate::error::GameError;
use crate::participant::ParticipantId;
use crate::phase::GamePhase;
use crate::timer::Timer;
use crate::vote::{Ballot, VoteOutcome};

/// Identifies one collaborator request. A response whose ticket no longer
/// matches what the game is waiting for is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    pub epoch: u64,
    pub seq: u64,
    pub participant: ParticipantId,
}

/// Everything the AI collaborator needs to produce one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub system: String,
    /// Copies of the recent conversation, oldest first.
    pub transcript: Vec<ConversationEntry>,
    pub instruction: String,
    pub max_tokens: u32,
}

/// Inputs the state machine accepts.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Leave the lobby and start waiting for connections.
    Start,
    Connect(ParticipantId),
    Disconnect(ParticipantId),
    HumanMessage(String),
    HumanVote(ParticipantId),
    HumanTypingStart,
    HumanTypingStop,
    /// Voice activity from the human: barge-in.
    HumanSpeakingStart,
    HumanSpeakingStop,
    UtteranceReady { ticket: Ticket, text: String },
    VoteCast { ticket: Ticket, target: ParticipantId },
    PlaybackFinished(ParticipantId),
    Timer(Timer),
}

impl InboundEvent {
    /// Short label for logs and rejections.
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Start => "start",
            InboundEvent::Connect(_) => "connect",
            InboundEvent::Disconnect(_) => "disconnect",
            InboundEvent::HumanMessage(_) => "human message",
            InboundEvent::HumanVote(_) => "human vote",
            InboundEvent::HumanTypingStart => "typing start",
            InboundEvent::HumanTypingStop => "typing stop",
            InboundEvent::HumanSpeakingStart => "speaking start",
            InboundEvent::HumanSpeakingStop => "speaking stop",
            InboundEvent::UtteranceReady { .. } => "utterance",
            InboundEvent::VoteCast { .. } => "vote",
            InboundEvent::PlaybackFinished(_) => "playback finished",
            InboundEvent::Timer(_) => "timer",
        }
    }
}

/// Work the runtime must carry out on the machine's behalf.
#[derive(Debug, Clone)]
pub enum Effect {
    RequestUtterance {
        ticket: Ticket,
        prompt: PromptContext,
    },
    RequestVote {
        ticket: Ticket,
        prompt: PromptContext,
        candidates: Vec<(ParticipantId, String)>,
    },
    NotifySystemEvent {
        participants: Vec<ParticipantId>,
        text: String,
    },
    PlayAudio(PlaybackItem),
    StopAudio(ParticipantId),
    Schedule {
        delay: Duration,
        timer: Timer,
    },
    /// Abort every timer scheduled under `epoch`.
    CancelTimers {
        epoch: u64,
    },
    PhaseChanged {
        from: GamePhase,
        to: GamePhase,
    },
    Broadcast(Snapshot),
}

/// How the game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The human was voted out: a loss.
    HumanIdentified,
    /// The human made it to the verdict: a win.
    HumanSurvived,
    /// Nobody human was playing.
    Concluded,
}

/// State published to clients after every accepted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub phase: GamePhase,
    pub epoch: u64,
    pub connected_participants: Vec<ParticipantId>,
    pub eliminated_participants: Vec<ParticipantId>,
    pub conversation_window: Vec<ConversationEntry>,
    pub active_speaker: Option<ParticipantId>,
    pub votes: Vec<Ballot>,
    pub vote_results: Option<VoteOutcome>,
    pub round_deadline_ms: Option<u64>,
    pub round_remaining_ms: Option<u64>,
    pub reveal_deadline_ms: Option<u64>,
    pub facilitator: Option<ParticipantId>,
    pub outcome: Option<Outcome>,
}

impl Snapshot {
    /// The wire form sent to clients.
    pub fn to_json(&self) -> Result<String, GameError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Serialize a game-clock `Duration` as whole milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::EntryId;

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = Snapshot {
            phase: GamePhase::Round1,
            epoch: 4,
            connected_participants: vec![ParticipantId(0), ParticipantId(1)],
            eliminated_participants: vec![],
            conversation_window: vec![ConversationEntry {
                id: EntryId(0),
                speaker_id: ParticipantId(1),
                speaker_name: "Ada".to_string(),
                text: "Evening.".to_string(),
                created_at: Duration::from_millis(1500),
            }],
            active_speaker: Some(ParticipantId(1)),
            votes: vec![],
            vote_results: None,
            round_deadline_ms: Some(90_000),
            round_remaining_ms: Some(88_500),
            reveal_deadline_ms: None,
            facilitator: None,
            outcome: None,
        };
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["phase"], "round1");
        assert_eq!(json["activeSpeaker"], 1);
        assert_eq!(json["conversationWindow"][0]["createdAt"], 1500);
        assert_eq!(json["conversationWindow"][0]["speakerName"], "Ada");
        assert_eq!(json["roundDeadlineMs"], 90_000);
    }
}
