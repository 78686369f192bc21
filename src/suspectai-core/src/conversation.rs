//! Conversation history.
//!
//! Append-only except for [`ConversationLog::remove`], which exists for
//! interrupted playback: an utterance the human never heard in full must not
//! stay in the context other players react to.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::participant::ParticipantId;

/// Monotonic identifier of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

/// A single spoken or typed line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub id: EntryId,
    pub speaker_id: ParticipantId,
    pub speaker_name: String,
    pub text: String,
    /// Game clock at the time the entry was appended.
    #[serde(with = "crate::event::millis")]
    pub created_at: Duration,
}

#[derive(Debug, Default)]
pub struct ConversationLog {
    entries: Vec<ConversationEntry>,
    next_id: u64,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return its id.
    pub fn append(
        &mut self,
        speaker_id: ParticipantId,
        speaker_name: impl Into<String>,
        text: impl Into<String>,
        created_at: Duration,
    ) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(ConversationEntry {
            id,
            speaker_id,
            speaker_name: speaker_name.into(),
            text: text.into(),
            created_at,
        });
        id
    }

    /// Drop an entry; returns it if it was present.
    pub fn remove(&mut self, id: EntryId) -> Option<ConversationEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx))
    }

    pub fn get(&self, id: EntryId) -> Option<&ConversationEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.last()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[ConversationEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn transcript(&self) -> &[ConversationEntry] {
        &self.entries
    }

    /// Speakers of the last `n` entries, most recent first, without repeats.
    pub fn recent_speakers(&self, n: usize) -> Vec<ParticipantId> {
        let mut speakers = Vec::with_capacity(n);
        for entry in self.entries.iter().rev() {
            if speakers.len() == n {
                break;
            }
            if !speakers.contains(&entry.speaker_id) {
                speakers.push(entry.speaker_id);
            }
        }
        speakers
    }

    /// When `speaker` last said something, if ever.
    pub fn last_spoken_by(&self, speaker: ParticipantId) -> Option<Duration> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.speaker_id == speaker)
            .map(|e| e.created_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render entries as `Name: text` lines for prompts.
pub fn format_transcript(entries: &[ConversationEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.speaker_name, e.text))
        .collect::<Vec<_>>()
        .join("\n")
}
