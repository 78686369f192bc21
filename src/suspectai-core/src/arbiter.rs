//! Turn arbitration heuristics.
//!
//! Decides who is expected to talk next: someone who was just addressed by
//! name, someone called out for staying silent, or simply whoever has not
//! spoken recently. This is pattern matching, not language understanding;
//! the goal is plausible turn-taking.

use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use std::time::Duration;

use crate::conversation::{ConversationEntry, EntryId};
use crate::participant::ParticipantId;

const INTERROGATIVES: &str = "what|why|how|who|whom|whose|where|when|which|do|does|did|are|is|were|was|can|could|would|will|have|has|should";
const IMPERATIVES: &str = "tell|say|answer|explain|prove|admit|describe|give|respond|talk";
const OPENERS: &str = "hey|so|okay|ok|well";

/// Find the participant a line directly addresses, if any.
///
/// `roster` should contain only active participants other than the speaker.
/// A name matches when a question mark closes the same sentence, or when it
/// is followed by an interrogative word or imperative cue (optionally after a
/// comma). A line that opens with a name and contains a question mark
/// anywhere also counts. The earliest match in the text wins.
pub fn detect_direct_address(text: &str, roster: &[(ParticipantId, String)]) -> Option<ParticipantId> {
    let has_question = text.contains('?');
    let mut best: Option<(usize, ParticipantId)> = None;

    for (id, name) in roster {
        if name.trim().is_empty() {
            continue;
        }
        let name = regex::escape(name.trim());
        let patterns = [
            format!(r"(?i)\b{name}\b[^.!?]*\?"),
            format!(r"(?i)\b{name}\b\s*[,:]?\s*(?:{INTERROGATIVES})\b"),
            format!(r"(?i)\b{name}\b\s*[,:]?\s*(?:{IMPERATIVES})\b"),
        ];

        let mut position = patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .filter_map(|re| re.find(text).map(|m| m.start()))
            .min();

        if has_question {
            let opener = format!(r"(?i)^\s*(?:(?:{OPENERS})[,\s]+)?{name}\b");
            if let Ok(re) = Regex::new(&opener) {
                if re.is_match(text) {
                    position = Some(0);
                }
            }
        }

        if let Some(pos) = position {
            if best.is_none_or(|(best_pos, _)| pos < best_pos) {
                best = Some((pos, *id));
            }
        }
    }

    best.map(|(_, id)| id)
}

/// The participant whose name appears first in `text`, if any.
pub fn first_mentioned(text: &str, roster: &[(ParticipantId, String)]) -> Option<ParticipantId> {
    roster
        .iter()
        .filter(|(_, name)| !name.trim().is_empty())
        .filter_map(|(id, name)| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(name.trim()));
            Regex::new(&pattern)
                .ok()
                .and_then(|re| re.find(text))
                .map(|m| (m.start(), *id))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, id)| id)
}

/// Pick the next AI to speak when nobody is obligated to.
///
/// `recent_speakers` is most-recent-first. An explicit `mentioned` candidate
/// wins over the recency rules unless they just spoke.
pub fn pick_next_speaker<R: Rng + ?Sized>(
    candidates: &[ParticipantId],
    recent_speakers: &[ParticipantId],
    mentioned: Option<ParticipantId>,
    rng: &mut R,
) -> Option<ParticipantId> {
    let previous = recent_speakers.first().copied();

    if let Some(id) = mentioned {
        if candidates.contains(&id) && previous != Some(id) {
            return Some(id);
        }
    }

    let last_two = &recent_speakers[..recent_speakers.len().min(2)];
    let fresh: Vec<ParticipantId> = candidates
        .iter()
        .copied()
        .filter(|id| !last_two.contains(id))
        .collect();
    if let Some(id) = fresh.choose(rng) {
        return Some(*id);
    }

    let not_previous: Vec<ParticipantId> = candidates
        .iter()
        .copied()
        .filter(|id| Some(*id) != previous)
        .collect();
    if let Some(id) = not_previous.choose(rng) {
        return Some(*id);
    }

    candidates.choose(rng).copied()
}

/// Somebody was addressed and owes an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingObligation {
    pub participant: ParticipantId,
    pub asker: ParticipantId,
    /// The line that created the obligation.
    pub source_entry: EntryId,
    pub deadline: Duration,
    pub seq: u64,
}

/// What an appended entry did to the pending obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObligationUpdate {
    Unchanged,
    /// The obligated participant spoke.
    Resolved(PendingObligation),
    /// A new obligation replaced whatever was pending.
    Set(PendingObligation),
}

/// Per-phase turn bookkeeping.
#[derive(Debug, Default)]
pub struct TurnArbiter {
    obligation: Option<PendingObligation>,
    next_seq: u64,
    quiet_callout_issued: bool,
    silence_seq: u64,
    blocked: bool,
}

impl TurnArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything from the previous phase.
    pub fn reset(&mut self) {
        self.obligation = None;
        self.quiet_callout_issued = false;
        self.silence_seq += 1;
        self.blocked = false;
    }

    /// Stop arbitrating turns (the verdict is a monologue).
    pub fn block(&mut self) {
        self.blocked = true;
        self.obligation = None;
    }

    pub fn obligation(&self) -> Option<&PendingObligation> {
        self.obligation.as_ref()
    }

    /// Inspect a freshly appended entry.
    ///
    /// `roster` holds the active participants other than the speaker.
    pub fn on_entry_appended(
        &mut self,
        entry: &ConversationEntry,
        roster: &[(ParticipantId, String)],
        deadline_after: Duration,
    ) -> ObligationUpdate {
        if self.blocked {
            return ObligationUpdate::Unchanged;
        }

        let resolved = self.take_if(|pending| pending.participant == entry.speaker_id);

        if let Some(target) = detect_direct_address(&entry.text, roster) {
            if target != entry.speaker_id {
                self.next_seq += 1;
                let obligation = PendingObligation {
                    participant: target,
                    asker: entry.speaker_id,
                    source_entry: entry.id,
                    deadline: entry.created_at + deadline_after,
                    seq: self.next_seq,
                };
                self.obligation = Some(obligation.clone());
                return ObligationUpdate::Set(obligation);
            }
        }

        match resolved {
            Some(obligation) => ObligationUpdate::Resolved(obligation),
            None => ObligationUpdate::Unchanged,
        }
    }

    /// The deadline timer for obligation `seq` fired.
    ///
    /// Returns the expired obligation if it was still outstanding; it is
    /// cleared either way so exactly one callout can follow.
    pub fn on_deadline(&mut self, seq: u64) -> Option<PendingObligation> {
        self.take_if(|pending| pending.seq == seq)
    }

    /// Drop the obligation created by an entry that was cut from the log.
    pub fn forget_entry(&mut self, entry: EntryId) -> Option<PendingObligation> {
        self.take_if(|pending| pending.source_entry == entry)
    }

    /// Drop any obligation owed by or to `participant` (they left).
    pub fn release(&mut self, participant: ParticipantId) -> Option<PendingObligation> {
        self.take_if(|pending| pending.participant == participant || pending.asker == participant)
    }

    fn take_if(&mut self, pred: impl FnOnce(&PendingObligation) -> bool) -> Option<PendingObligation> {
        if self.obligation.as_ref().is_some_and(pred) {
            self.obligation.take()
        } else {
            None
        }
    }

    /// The human spoke; re-arm the silence watch. Returns the new token.
    pub fn human_spoke(&mut self) -> u64 {
        self.silence_seq += 1;
        self.silence_seq
    }

    pub fn silence_seq(&self) -> u64 {
        self.silence_seq
    }

    /// Whether the "human has been quiet" prompt may fire for token `seq`.
    /// Consumes the once-per-phase allowance when it returns true.
    pub fn take_quiet_callout(&mut self, seq: u64) -> bool {
        if self.blocked || self.quiet_callout_issued || seq != self.silence_seq {
            return false;
        }
        self.quiet_callout_issued = true;
        true
    }
}

/// Who should remark on a missed answer.
///
/// The asker if it is an active AI; otherwise any active AI other than the
/// silent participant.
pub fn callout_speaker<R: Rng + ?Sized>(
    expired: &PendingObligation,
    active_ais: &[ParticipantId],
    rng: &mut R,
) -> Option<ParticipantId> {
    if active_ais.contains(&expired.asker) && expired.asker != expired.participant {
        return Some(expired.asker);
    }
    let others: Vec<ParticipantId> = active_ais
        .iter()
        .copied()
        .filter(|id| *id != expired.participant)
        .collect();
    others.choose(rng).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn roster() -> Vec<(ParticipantId, String)> {
        vec![
            (ParticipantId(1), "Ada".to_string()),
            (ParticipantId(2), "Bo".to_string()),
            (ParticipantId(3), "Cy".to_string()),
        ]
    }

    fn entry(id: u64, speaker: u32, text: &str, at: u64) -> ConversationEntry {
        ConversationEntry {
            id: EntryId(id),
            speaker_id: ParticipantId(speaker),
            speaker_name: format!("P{}", speaker),
            text: text.to_string(),
            created_at: Duration::from_secs(at),
        }
    }

    #[test]
    fn test_detects_name_then_interrogative() {
        let text = "I have my doubts. Bo, are you a bot?";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(2)));
    }

    #[test]
    fn test_detects_name_then_question_mark() {
        let text = "That was oddly specific, Cy?";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(3)));
    }

    #[test]
    fn test_detects_imperative() {
        let text = "Ada, tell us where you were last night.";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(1)));
    }

    #[test]
    fn test_leading_name_with_trailing_question() {
        let text = "Hey Bo, I noticed you dodged that. Care to explain yourself?";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(2)));
    }

    #[test]
    fn test_mention_without_cue_is_not_address() {
        let text = "I suspect Ada of hiding something.";
        assert_eq!(detect_direct_address(text, &roster()), None);
    }

    #[test]
    fn test_question_later_in_the_same_sentence() {
        let text = "I have to ask, Bo, you were there last night?";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(2)));
    }

    #[test]
    fn test_question_in_a_later_sentence_does_not_count() {
        let text = "Earlier Ada seemed quiet. Where were you all?";
        assert_eq!(detect_direct_address(text, &roster()), None);
    }

    #[test]
    fn test_cue_without_separator() {
        let text = "Tell me Bo are you a bot?";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(2)));

        let text = "Okay then, Cy explain the fridge incident.";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(3)));
    }

    #[test]
    fn test_earliest_match_wins() {
        let text = "Cy, what do you think? And Ada, answer too.";
        assert_eq!(detect_direct_address(text, &roster()), Some(ParticipantId(3)));
    }

    #[test]
    fn test_name_must_be_whole_word() {
        let text = "Bob, are you there?";
        assert_eq!(detect_direct_address(text, &roster()), None);
    }

    #[test]
    fn test_eliminated_names_absent_from_roster_never_match() {
        let active: Vec<_> = roster().into_iter().filter(|(id, _)| id.0 != 2).collect();
        assert_eq!(detect_direct_address("Bo, are you a bot?", &active), None);
    }

    #[test]
    fn test_first_mentioned() {
        let text = "Honestly Cy and Ada both seem off.";
        assert_eq!(first_mentioned(text, &roster()), Some(ParticipantId(3)));
        assert_eq!(first_mentioned("nobody here", &roster()), None);
    }

    #[test]
    fn test_pick_prefers_mentioned() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = [ParticipantId(1), ParticipantId(2), ParticipantId(3)];
        let recent = [ParticipantId(1), ParticipantId(2)];
        let pick = pick_next_speaker(&candidates, &recent, Some(ParticipantId(2)), &mut rng);
        assert_eq!(pick, Some(ParticipantId(2)));
    }

    #[test]
    fn test_pick_avoids_last_two_speakers() {
        let candidates = [ParticipantId(1), ParticipantId(2), ParticipantId(3)];
        let recent = [ParticipantId(1), ParticipantId(2)];
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let pick = pick_next_speaker(&candidates, &recent, None, &mut rng);
            assert_eq!(pick, Some(ParticipantId(3)));
        }
    }

    #[test]
    fn test_pick_falls_back_to_not_previous() {
        let candidates = [ParticipantId(1), ParticipantId(2)];
        let recent = [ParticipantId(2), ParticipantId(1)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            pick_next_speaker(&candidates, &recent, None, &mut rng),
            Some(ParticipantId(1))
        );
    }

    #[test]
    fn test_pick_single_candidate() {
        let candidates = [ParticipantId(1)];
        let recent = [ParticipantId(1)];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            pick_next_speaker(&candidates, &recent, None, &mut rng),
            Some(ParticipantId(1))
        );
        assert_eq!(pick_next_speaker(&[], &recent, None, &mut rng), None);
    }

    #[test]
    fn test_obligation_set_and_self_resolved() {
        let mut arbiter = TurnArbiter::new();
        let deadline = Duration::from_secs(7);
        let ask = entry(1, 1, "Bo, are you a bot?", 10);
        let update = arbiter.on_entry_appended(&ask, &roster(), deadline);
        let ObligationUpdate::Set(obligation) = update else {
            panic!("expected obligation, got {:?}", update);
        };
        assert_eq!(obligation.participant, ParticipantId(2));
        assert_eq!(obligation.deadline, Duration::from_secs(17));

        let answer = entry(2, 2, "No, I am not.", 12);
        let update = arbiter.on_entry_appended(&answer, &roster(), deadline);
        assert!(matches!(update, ObligationUpdate::Resolved(_)));
        assert!(arbiter.obligation().is_none());
        assert_eq!(arbiter.on_deadline(obligation.seq), None);
    }

    #[test]
    fn test_deadline_fires_once() {
        let mut arbiter = TurnArbiter::new();
        let ask = entry(1, 1, "Bo, are you a bot?", 10);
        let ObligationUpdate::Set(obligation) =
            arbiter.on_entry_appended(&ask, &roster(), Duration::from_secs(7))
        else {
            panic!("expected obligation");
        };
        assert!(arbiter.on_deadline(obligation.seq).is_some());
        assert!(arbiter.on_deadline(obligation.seq).is_none());
    }

    #[test]
    fn test_new_address_overwrites_old() {
        let mut arbiter = TurnArbiter::new();
        let d = Duration::from_secs(7);
        arbiter.on_entry_appended(&entry(1, 1, "Bo, are you a bot?", 1), &roster(), d);
        arbiter.on_entry_appended(&entry(2, 3, "Ada, why ask that?", 2), &roster(), d);
        let pending = arbiter.obligation().unwrap();
        assert_eq!(pending.participant, ParticipantId(1));
        assert_eq!(pending.asker, ParticipantId(3));
    }

    #[test]
    fn test_forget_interrupted_entry() {
        let mut arbiter = TurnArbiter::new();
        arbiter.on_entry_appended(&entry(5, 1, "Cy, explain.", 1), &roster(), Duration::from_secs(7));
        assert!(arbiter.forget_entry(EntryId(4)).is_none());
        assert!(arbiter.forget_entry(EntryId(5)).is_some());
        assert!(arbiter.obligation().is_none());
    }

    #[test]
    fn test_quiet_callout_once_per_phase() {
        let mut arbiter = TurnArbiter::new();
        arbiter.reset();
        let seq = arbiter.silence_seq();
        assert!(arbiter.take_quiet_callout(seq));
        assert!(!arbiter.take_quiet_callout(seq));
        arbiter.reset();
        let stale = seq;
        assert!(!arbiter.take_quiet_callout(stale));
        assert!(arbiter.take_quiet_callout(arbiter.silence_seq()));
    }

    #[test]
    fn test_human_speaking_rearms_silence_token() {
        let mut arbiter = TurnArbiter::new();
        let before = arbiter.silence_seq();
        let after = arbiter.human_spoke();
        assert!(!arbiter.take_quiet_callout(before));
        assert!(arbiter.take_quiet_callout(after));
    }

    #[test]
    fn test_blocked_arbiter_ignores_entries() {
        let mut arbiter = TurnArbiter::new();
        arbiter.block();
        let update = arbiter.on_entry_appended(
            &entry(1, 1, "Bo, are you a bot?", 1),
            &roster(),
            Duration::from_secs(7),
        );
        assert_eq!(update, ObligationUpdate::Unchanged);
        assert!(!arbiter.take_quiet_callout(arbiter.silence_seq()));
    }

    #[test]
    fn test_callout_prefers_ai_asker() {
        let mut rng = StdRng::seed_from_u64(3);
        let expired = PendingObligation {
            participant: ParticipantId(0),
            asker: ParticipantId(2),
            source_entry: EntryId(1),
            deadline: Duration::ZERO,
            seq: 1,
        };
        let ais = [ParticipantId(1), ParticipantId(2), ParticipantId(3)];
        assert_eq!(callout_speaker(&expired, &ais, &mut rng), Some(ParticipantId(2)));
    }

    #[test]
    fn test_callout_from_human_asker_picks_other_ai() {
        let mut rng = StdRng::seed_from_u64(3);
        let expired = PendingObligation {
            participant: ParticipantId(2),
            asker: ParticipantId(0),
            source_entry: EntryId(1),
            deadline: Duration::ZERO,
            seq: 1,
        };
        let ais = [ParticipantId(2), ParticipantId(3)];
        assert_eq!(callout_speaker(&expired, &ais, &mut rng), Some(ParticipantId(3)));
    }
}
