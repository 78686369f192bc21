//! Single-speaker audio dispatch.
//!
//! Exactly one participant "speaks" at a time. Everyone else waits in a
//! short queue; a long backlog means the conversation has moved on, so it is
//! dropped rather than replayed.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::AudioConfig;
use crate::conversation::EntryId;
use crate::participant::ParticipantId;

/// An utterance waiting to be (or being) played.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackItem {
    pub speaker_id: ParticipantId,
    pub speaker_name: String,
    pub text: String,
    #[serde(with = "crate::event::millis")]
    pub queued_at: Duration,
    /// Pre-rendered audio, when the synthesis collaborator supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,
}

impl PlaybackItem {
    pub fn new(
        speaker_id: ParticipantId,
        speaker_name: impl Into<String>,
        text: impl Into<String>,
        queued_at: Duration,
    ) -> Self {
        Self {
            speaker_id,
            speaker_name: speaker_name.into(),
            text: text.into(),
            queued_at,
            audio: None,
        }
    }
}

/// The item currently playing.
#[derive(Debug, Clone)]
pub struct ActivePlayback {
    pub item: PlaybackItem,
    /// Log entry appended when playback started.
    pub entry: Option<EntryId>,
    pub started_at: Duration,
    /// Distinguishes successive playbacks for completion timeouts.
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Nobody was speaking; the item is now active.
    Started,
    /// Waiting behind the active speaker or a hold window. `evicted` counts
    /// backlog items discarded to make room.
    Queued { evicted: usize },
    /// The speaker already had an item waiting; the new one was dropped.
    Duplicate,
}

#[derive(Debug)]
pub struct AudioDispatchQueue {
    active: Option<ActivePlayback>,
    queue: VecDeque<PlaybackItem>,
    hold_until: Option<Duration>,
    cap: usize,
    next_seq: u64,
}

impl AudioDispatchQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            active: None,
            queue: VecDeque::new(),
            hold_until: None,
            cap: cap.max(1),
            next_seq: 0,
        }
    }

    pub fn enqueue(&mut self, item: PlaybackItem, now: Duration) -> EnqueueOutcome {
        if self.queue.iter().any(|q| q.speaker_id == item.speaker_id) {
            return EnqueueOutcome::Duplicate;
        }

        if self.active.is_none() && !self.is_held(now) && self.queue.is_empty() {
            self.start(item, now);
            return EnqueueOutcome::Started;
        }

        let mut evicted = 0;
        if self.queue.len() >= self.cap {
            evicted = self.queue.len();
            self.queue.clear();
        }
        self.queue.push_back(item);
        EnqueueOutcome::Queued { evicted }
    }

    fn start(&mut self, item: PlaybackItem, now: Duration) {
        self.next_seq += 1;
        self.active = Some(ActivePlayback {
            item,
            entry: None,
            started_at: now,
            seq: self.next_seq,
        });
    }

    /// Start the earliest queued item if nothing is playing and no hold is
    /// in effect. Returns the newly active playback.
    pub fn advance(&mut self, now: Duration) -> Option<&ActivePlayback> {
        if self.active.is_some() || self.is_held(now) {
            return None;
        }
        let item = self.queue.pop_front()?;
        self.start(item, now);
        self.active.as_ref()
    }

    /// Delay playback until `until`, e.g. while a banner overlay is shown.
    pub fn hold(&mut self, until: Duration) {
        self.hold_until = Some(until);
    }

    pub fn is_held(&self, now: Duration) -> bool {
        self.hold_until.is_some_and(|until| now < until)
    }

    /// Lift the hold window.
    pub fn release_hold(&mut self) {
        self.hold_until = None;
    }

    /// The active speaker finished. Idempotent: a report for someone who is
    /// not the active speaker changes nothing and returns `None`.
    pub fn finish(&mut self, speaker: ParticipantId) -> Option<ActivePlayback> {
        if self.active_speaker() != Some(speaker) {
            return None;
        }
        self.active.take()
    }

    /// Force-complete playback `seq` if it is still the active one.
    pub fn finish_seq(&mut self, seq: u64) -> Option<ActivePlayback> {
        if self.active.as_ref().is_some_and(|a| a.seq == seq) {
            self.active.take()
        } else {
            None
        }
    }

    /// Barge-in: drop the backlog and cut the active speaker off.
    pub fn interrupt(&mut self) -> Option<ActivePlayback> {
        self.queue.clear();
        self.active.take()
    }

    /// Drop the backlog, keep whatever is playing.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Record the log entry backing the active playback.
    pub fn set_active_entry(&mut self, entry: EntryId) {
        if let Some(active) = self.active.as_mut() {
            active.entry = Some(entry);
        }
    }

    pub fn active(&self) -> Option<&ActivePlayback> {
        self.active.as_ref()
    }

    pub fn active_speaker(&self) -> Option<ParticipantId> {
        self.active.as_ref().map(|a| a.item.speaker_id)
    }

    pub fn is_queued(&self, speaker: ParticipantId) -> bool {
        self.queue.iter().any(|q| q.speaker_id == speaker)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Nothing playing and nothing waiting.
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }
}

/// Rough spoken duration of `text` at `words_per_second`.
pub fn estimate_speech_duration(text: &str, words_per_second: f32) -> Duration {
    let words = text.split_whitespace().count().max(1) as f32;
    Duration::from_secs_f32(words / words_per_second.max(0.1))
}

/// How long to wait before force-completing playback of `text`.
///
/// A generous multiple of the estimate covers synthesis and network
/// variance; the hard ceiling applies regardless of the estimate.
pub fn completion_timeout(text: &str, audio: &AudioConfig) -> Duration {
    let estimate = estimate_speech_duration(text, audio.words_per_second);
    let padded = estimate.mul_f32(audio.duration_multiplier.max(1.0))
        + Duration::from_millis(audio.slack_ms);
    padded.min(Duration::from_secs(audio.hard_ceiling_secs))
}
