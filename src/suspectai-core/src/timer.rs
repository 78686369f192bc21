//! Round countdown and scheduled timers.
//!
//! Nothing here sleeps. The state machine asks for timers through
//! [`Effect::Schedule`](crate::event::Effect::Schedule); the runtime fires
//! them back as events. Every timer carries the epoch it was scheduled under
//! and is ignored if the game has moved on.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::participant::ParticipantId;

/// What a scheduled timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimerKind {
    ConnectTimeout,
    IntroTimeout,
    RoundTick,
    RoundExpired,
    HoldExpired,
    NextSpeaker,
    ObligationDeadline { seq: u64 },
    HumanSilence { seq: u64 },
    HumanActivityStale { seq: u64 },
    PlaybackTimeout { seq: u64 },
    ResponseTimeout { participant: ParticipantId, seq: u64 },
    VoteTimeout,
    RevealElapsed,
    VerdictTimeout,
}

/// A timer bound to the phase epoch it was scheduled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timer {
    pub epoch: u64,
    #[serde(flatten)]
    pub kind: TimerKind,
}

/// Per-phase countdown.
#[derive(Debug, Default, Clone)]
pub struct RoundTimer {
    started_at: Option<Duration>,
    duration: Duration,
}

impl RoundTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: Duration, duration: Duration) {
        self.started_at = Some(now);
        self.duration = duration;
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Game-clock time at which the round ends.
    pub fn deadline(&self) -> Option<Duration> {
        self.started_at.map(|start| start + self.duration)
    }

    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        self.deadline().map(|d| d.saturating_sub(now))
    }

    pub fn is_expired(&self, now: Duration) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }
}
