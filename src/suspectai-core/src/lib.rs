//! SuspectAI Core Library
//!
//! Game logic for a live social-deduction show: one human hides among AI
//! callers, a moderator runs timed rounds, and players vote each other out.
//! The phase state machine is pure; the host drives it on a tokio runtime.

pub mod arbiter;
pub mod audio_queue;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod host;
pub mod machine;
pub mod participant;
pub mod phase;
mod prompts;
pub mod registry;
pub mod responder;
pub mod timer;
pub mod vote;

pub use arbiter::{PendingObligation, TurnArbiter};
pub use audio_queue::{AudioDispatchQueue, PlaybackItem, estimate_speech_duration};
pub use config::{Config, default_config};
pub use conversation::{ConversationEntry, ConversationLog, EntryId};
pub use error::{GameError, VoteRejection};
pub use event::{Effect, InboundEvent, Outcome, PromptContext, Snapshot, Ticket};
pub use host::{GameHandle, GameHost, HostEvent, Scheduler};
pub use machine::PhaseStateMachine;
pub use participant::{Participant, ParticipantId, ParticipantKind};
pub use phase::GamePhase;
pub use registry::ConnectionRegistry;
pub use responder::{OpenAiResponder, Responder, ScriptedResponder};
pub use timer::{Timer, TimerKind};
pub use vote::{VoteOutcome, VoteResolver};
