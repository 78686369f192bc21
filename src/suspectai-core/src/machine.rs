//! The game's phase state machine.
//!
//! [`PhaseStateMachine::advance`] consumes one [`InboundEvent`] and returns
//! the [`Effect`]s the runtime must carry out. It never sleeps or performs
//! I/O: the current game-clock time is passed in, and every timer it wants
//! is returned as an [`Effect::Schedule`] stamped with the phase epoch.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::arbiter::{ObligationUpdate, TurnArbiter, callout_speaker, first_mentioned, pick_next_speaker};
use crate::audio_queue::{ActivePlayback, AudioDispatchQueue, EnqueueOutcome, PlaybackItem, completion_timeout};
use crate::config::{Config, render};
use crate::conversation::{ConversationLog, EntryId};
use crate::error::GameError;
use crate::event::{Effect, InboundEvent, Outcome, Snapshot, Ticket};
use crate::participant::{Participant, ParticipantId};
use crate::phase::GamePhase;
use crate::prompts::PromptBuilder;
use crate::registry::ConnectionRegistry;
use crate::timer::{RoundTimer, Timer, TimerKind};
use crate::vote::{VoteProgress, VoteResolver};

pub struct PhaseStateMachine {
    config: Config,
    phase: GamePhase,
    /// Bumped on every transition; timers and tickets from older epochs
    /// are ignored.
    epoch: u64,
    history: Vec<GamePhase>,
    registry: ConnectionRegistry,
    log: ConversationLog,
    arbiter: TurnArbiter,
    audio: AudioDispatchQueue,
    round_timer: RoundTimer,
    votes: VoteResolver,
    rng: StdRng,
    facilitator: Option<ParticipantId>,
    /// Outstanding collaborator requests, by participant.
    in_flight: HashMap<ParticipantId, u64>,
    next_ticket: u64,
    human_typing: bool,
    human_speaking: bool,
    /// Token for the latest typing/speaking indicator; a stale timer
    /// clears both flags if no newer indicator arrived.
    activity_seq: u64,
    reveal_deadline: Option<Duration>,
    outcome: Option<Outcome>,
}

impl PhaseStateMachine {
    pub fn new(config: Config, participants: Vec<Participant>) -> Result<Self, GameError> {
        let registry = ConnectionRegistry::new(participants)?;
        let rng = match config.game.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let audio = AudioDispatchQueue::new(config.audio.queue_cap);

        Ok(Self {
            config,
            phase: GamePhase::Lobby,
            epoch: 0,
            history: vec![GamePhase::Lobby],
            registry,
            log: ConversationLog::new(),
            arbiter: TurnArbiter::new(),
            audio,
            round_timer: RoundTimer::new(),
            votes: VoteResolver::new(),
            rng,
            facilitator: None,
            in_flight: HashMap::new(),
            next_ticket: 0,
            human_typing: false,
            human_speaking: false,
            activity_seq: 0,
            reveal_deadline: None,
            outcome: None,
        })
    }

    /// Build a machine from the configured roster.
    pub fn from_config(config: Config, default_model: &str) -> Result<Self, GameError> {
        let participants = config.participants(default_model);
        Self::new(config, participants)
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Every phase entered so far, starting with the lobby.
    pub fn history(&self) -> &[GamePhase] {
        &self.history
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn arbiter(&self) -> &TurnArbiter {
        &self.arbiter
    }

    pub fn audio(&self) -> &AudioDispatchQueue {
        &self.audio
    }

    pub fn votes(&self) -> &VoteResolver {
        &self.votes
    }

    pub fn facilitator(&self) -> Option<ParticipantId> {
        self.facilitator
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Apply one event. Accepted events that change visible state end with
    /// an [`Effect::Broadcast`].
    pub fn advance(&mut self, event: InboundEvent, now: Duration) -> Result<Vec<Effect>, GameError> {
        if self.phase.is_terminal() {
            return Err(GameError::PhaseRejected {
                phase: self.phase,
                action: event.name(),
            });
        }

        let mut fx = Vec::new();
        let changed = match event {
            InboundEvent::Start => self.on_start(now, &mut fx)?,
            InboundEvent::Connect(id) => self.on_connect(id, now, &mut fx)?,
            InboundEvent::Disconnect(id) => self.on_disconnect(id, now, &mut fx)?,
            InboundEvent::HumanMessage(text) => self.on_human_message(&text, now, &mut fx)?,
            InboundEvent::HumanVote(target) => self.on_human_vote(target, now, &mut fx)?,
            InboundEvent::HumanTypingStart => {
                self.human_typing = true;
                self.watch_human_activity(&mut fx);
                false
            }
            InboundEvent::HumanTypingStop => {
                self.human_typing = false;
                self.nudge(&mut fx);
                false
            }
            InboundEvent::HumanSpeakingStart => self.on_speaking_start(&mut fx),
            InboundEvent::HumanSpeakingStop => {
                self.human_speaking = false;
                self.nudge(&mut fx);
                false
            }
            InboundEvent::UtteranceReady { ticket, text } => self.on_utterance(ticket, &text, now, &mut fx)?,
            InboundEvent::VoteCast { ticket, target } => self.on_vote_cast(ticket, target, now, &mut fx)?,
            InboundEvent::PlaybackFinished(speaker) => self.on_playback_finished(speaker, now, &mut fx)?,
            InboundEvent::Timer(timer) => self.on_timer(timer, now, &mut fx)?,
        };

        if changed {
            fx.push(Effect::Broadcast(self.snapshot(now)));
        }
        Ok(fx)
    }

    pub fn snapshot(&self, now: Duration) -> Snapshot {
        Snapshot {
            phase: self.phase,
            epoch: self.epoch,
            connected_participants: self.registry.connected_ids(),
            eliminated_participants: self.registry.eliminated_ids(),
            conversation_window: self.log.recent(self.config.game.conversation_window).to_vec(),
            active_speaker: self.audio.active_speaker(),
            votes: self.votes.ballots(),
            vote_results: self.votes.outcome().cloned(),
            round_deadline_ms: self.round_timer.deadline().map(as_millis),
            round_remaining_ms: self.round_timer.remaining(now).map(as_millis),
            reveal_deadline_ms: self.reveal_deadline.map(as_millis),
            facilitator: self.facilitator,
            outcome: self.outcome,
        }
    }

    // Inbound handlers. Each returns whether visible state changed.

    fn on_start(&mut self, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        if self.phase != GamePhase::Lobby {
            return Err(self.rejected("start"));
        }
        self.transition_to(GamePhase::Connecting, now, fx)?;
        Ok(true)
    }

    fn on_connect(&mut self, id: ParticipantId, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        let changed = self.registry.connect(id)?;
        if changed {
            info!(participant = %id, name = self.registry.name_of(id), "participant connected");
        }
        if self.phase == GamePhase::Connecting && self.registry.all_players_connected() {
            self.transition_to(GamePhase::ModeratorIntro, now, fx)?;
            return Ok(true);
        }
        Ok(changed)
    }

    fn on_disconnect(&mut self, id: ParticipantId, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        if !self.registry.disconnect(id)? {
            return Ok(false);
        }
        info!(participant = %id, name = self.registry.name_of(id), "participant disconnected");

        self.in_flight.remove(&id);
        if self.registry.human_id() == Some(id) {
            self.clear_human_activity();
        }
        if let Some(released) = self.arbiter.release(id) {
            debug!(participant = %released.participant, "obligation released");
        }
        if let Some(done) = self.audio.finish(id) {
            fx.push(Effect::StopAudio(id));
            self.after_playback(&done, now, fx)?;
        }
        if self.phase.is_elimination()
            && self.votes.is_open()
            && self.votes.remove_voter(id) == VoteProgress::Complete
        {
            self.resolve_ballot(now, fx)?;
        }
        self.nudge(fx);
        Ok(true)
    }

    fn on_human_message(&mut self, text: &str, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        if !self.phase.is_round() {
            return Err(self.rejected("human message"));
        }
        let human = self.registry.human().ok_or(GameError::NoHuman)?;
        let (human_id, human_name) = (human.id, human.name.clone());

        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        self.human_typing = false;

        let entry = self.log.append(human_id, human_name, text, now);
        let seq = self.arbiter.human_spoke();
        self.schedule(fx, self.config.timing.human_silence(), TimerKind::HumanSilence { seq });

        if !self.on_appended(entry, now, fx) {
            self.schedule(fx, self.config.timing.reply_delay(), TimerKind::NextSpeaker);
        }
        Ok(true)
    }

    fn on_human_vote(&mut self, target: ParticipantId, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        if !self.phase.is_elimination() {
            return Err(self.rejected("human vote"));
        }
        let human = self.registry.human_id().ok_or(GameError::NoHuman)?;
        if self.votes.register_vote(human, target)? == VoteProgress::Complete {
            self.resolve_ballot(now, fx)?;
        }
        Ok(true)
    }

    fn on_speaking_start(&mut self, fx: &mut Vec<Effect>) -> bool {
        self.human_speaking = true;
        self.watch_human_activity(fx);
        if self.phase.is_round() && self.cut_active(fx) {
            info!("human barged in; playback interrupted");
            return true;
        }
        false
    }

    fn on_utterance(&mut self, ticket: Ticket, text: &str, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        if !self.accept_ticket(ticket) {
            debug!(participant = %ticket.participant, epoch = ticket.epoch, "discarding stale utterance");
            return Ok(false);
        }

        let speaker_ok = match self.phase {
            GamePhase::ModeratorIntro | GamePhase::Verdict => self.is_moderator(ticket.participant),
            phase if phase.is_round() => self.is_active_ai(ticket.participant),
            _ => false,
        };
        if !speaker_ok {
            debug!(participant = %ticket.participant, phase = %self.phase, "utterance not accepted in this phase");
            return Ok(false);
        }

        let text = text.trim();
        if text.is_empty() {
            warn!(participant = %ticket.participant, "empty utterance");
            return self.skip_turn(ticket.participant, now, fx);
        }

        let name = self.registry.name_of(ticket.participant).to_string();
        let item = PlaybackItem::new(ticket.participant, name, text, now);
        match self.audio.enqueue(item, now) {
            EnqueueOutcome::Started => self.begin_active(now, fx),
            EnqueueOutcome::Queued { evicted } => {
                if evicted > 0 {
                    debug!(evicted, "audio backlog evicted");
                }
                self.pump_audio(now, fx);
            }
            EnqueueOutcome::Duplicate => {
                debug!(participant = %ticket.participant, "speaker already queued; utterance dropped");
            }
        }
        Ok(true)
    }

    fn on_vote_cast(&mut self, ticket: Ticket, target: ParticipantId, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        if !self.accept_ticket(ticket) || !self.phase.is_elimination() || !self.votes.is_open() {
            debug!(voter = %ticket.participant, "discarding stale vote");
            return Ok(false);
        }
        match self.votes.register_vote(ticket.participant, target) {
            Ok(VoteProgress::Complete) => self.resolve_ballot(now, fx)?,
            Ok(VoteProgress::Pending { cast, needed }) => {
                debug!(cast, needed, "vote registered");
            }
            Err(reason) => {
                warn!(voter = %ticket.participant, target = %target, %reason, "discarding AI vote");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn on_playback_finished(&mut self, speaker: ParticipantId, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        let Some(done) = self.audio.finish(speaker) else {
            return Ok(false);
        };
        self.after_playback(&done, now, fx)?;
        Ok(true)
    }

    fn on_timer(&mut self, timer: Timer, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        if timer.epoch != self.epoch {
            debug!(?timer, epoch = self.epoch, "stale timer ignored");
            return Ok(false);
        }

        match timer.kind {
            TimerKind::ConnectTimeout => {
                if self.phase != GamePhase::Connecting {
                    return Ok(false);
                }
                if self.registry.active_ais().is_empty() {
                    warn!("no AI has connected yet; still waiting");
                    self.schedule(fx, self.config.timing.connect_timeout(), TimerKind::ConnectTimeout);
                    return Ok(false);
                }
                self.transition_to(GamePhase::ModeratorIntro, now, fx)?;
                Ok(true)
            }
            TimerKind::IntroTimeout => {
                if self.phase != GamePhase::ModeratorIntro {
                    return Ok(false);
                }
                self.transition_to(GamePhase::Round1, now, fx)?;
                Ok(true)
            }
            TimerKind::RoundTick => {
                if !self.phase.is_round() {
                    return Ok(false);
                }
                if let Some(remaining) = self.round_timer.remaining(now).filter(|r| !r.is_zero()) {
                    self.schedule(fx, self.config.timing.tick().min(remaining), TimerKind::RoundTick);
                }
                Ok(true)
            }
            TimerKind::RoundExpired => {
                if !self.phase.is_round() {
                    return Ok(false);
                }
                info!(phase = %self.phase, "round time expired");
                let next = self.next_phase()?;
                self.transition_to(next, now, fx)?;
                Ok(true)
            }
            TimerKind::HoldExpired => {
                self.audio.release_hold();
                self.pump_audio(now, fx);
                Ok(true)
            }
            TimerKind::NextSpeaker => Ok(self.take_turn(now, fx)),
            TimerKind::ObligationDeadline { seq } => {
                let Some(expired) = self.arbiter.on_deadline(seq) else {
                    return Ok(false);
                };
                let silent = self.registry.name_of(expired.participant).to_string();
                info!(participant = %expired.participant, "direct question went unanswered");

                let ais = self.registry.active_ais();
                if let Some(speaker) = callout_speaker(&expired, &ais, &mut self.rng) {
                    let instruction = render(&self.config.prompts.missed_answer, &[("silent", &silent)]);
                    self.request_utterance(speaker, instruction, false, fx);
                }
                Ok(true)
            }
            TimerKind::HumanSilence { seq } => {
                if !self.phase.is_round() {
                    return Ok(false);
                }
                let Some(quiet) = self.registry.human().filter(|h| h.is_active()).map(|h| h.name.clone()) else {
                    return Ok(false);
                };
                if !self.arbiter.take_quiet_callout(seq) {
                    return Ok(false);
                }
                let speaker = match self.facilitator.filter(|f| self.is_active_ai(*f)) {
                    Some(facilitator) => Some(facilitator),
                    None => self.registry.active_ais().choose(&mut self.rng).copied(),
                };
                if let Some(speaker) = speaker {
                    info!(speaker = %speaker, "prompting the quiet human");
                    let instruction = render(&self.config.prompts.quiet_player, &[("quiet", &quiet)]);
                    self.request_utterance(speaker, instruction, false, fx);
                }
                Ok(true)
            }
            TimerKind::HumanActivityStale { seq } => {
                if seq != self.activity_seq || !(self.human_typing || self.human_speaking) {
                    return Ok(false);
                }
                warn!("typing/speaking indicator went stale; resuming turns");
                self.clear_human_activity();
                self.nudge(fx);
                Ok(false)
            }
            TimerKind::PlaybackTimeout { seq } => {
                let Some(done) = self.audio.finish_seq(seq) else {
                    return Ok(false);
                };
                warn!(speaker = %done.item.speaker_id, "playback completion never reported; forcing");
                fx.push(Effect::StopAudio(done.item.speaker_id));
                self.after_playback(&done, now, fx)?;
                Ok(true)
            }
            TimerKind::ResponseTimeout { participant, seq } => {
                if self.in_flight.get(&participant) != Some(&seq) {
                    return Ok(false);
                }
                self.in_flight.remove(&participant);
                warn!(participant = %participant, "collaborator did not respond in time");
                self.skip_turn(participant, now, fx)
            }
            TimerKind::VoteTimeout => {
                if !self.phase.is_elimination() || !self.votes.is_open() {
                    return Ok(false);
                }
                info!("vote timed out; resolving with the ballots cast");
                self.resolve_ballot(now, fx)?;
                Ok(true)
            }
            TimerKind::RevealElapsed => {
                if !self.phase.is_elimination() {
                    return Ok(false);
                }
                self.enact_reveal(now, fx)?;
                Ok(true)
            }
            TimerKind::VerdictTimeout => {
                if self.phase != GamePhase::Verdict {
                    return Ok(false);
                }
                self.finish_game(now, fx)?;
                Ok(true)
            }
        }
    }

    // Phase transitions.

    fn transition_to(&mut self, to: GamePhase, now: Duration, fx: &mut Vec<Effect>) -> Result<(), GameError> {
        let from = self.phase;
        if !from.can_transition_to(to) {
            return Err(GameError::IllegalTransition { from, to });
        }

        fx.push(Effect::CancelTimers { epoch: self.epoch });
        self.cut_active(fx);
        self.audio.clear_queue();
        self.audio.release_hold();
        self.in_flight.clear();
        self.clear_human_activity();
        self.votes.clear();
        self.arbiter.reset();
        self.round_timer.stop();
        self.reveal_deadline = None;

        self.epoch += 1;
        self.phase = to;
        self.history.push(to);
        info!(%from, %to, epoch = self.epoch, "phase transition");
        fx.push(Effect::PhaseChanged { from, to });

        match to {
            GamePhase::Lobby => Ok(()),
            GamePhase::Connecting => self.enter_connecting(now, fx),
            GamePhase::ModeratorIntro => {
                self.enter_intro(fx);
                Ok(())
            }
            GamePhase::Round1 | GamePhase::Round2 | GamePhase::Round3 => {
                self.enter_round(now, fx);
                Ok(())
            }
            GamePhase::Elimination1 | GamePhase::Elimination2 => self.enter_elimination(now, fx),
            GamePhase::Verdict => {
                self.enter_verdict(fx);
                Ok(())
            }
            GamePhase::GameOver => {
                info!(outcome = ?self.outcome, "game over");
                Ok(())
            }
        }
    }

    fn enter_connecting(&mut self, now: Duration, fx: &mut Vec<Effect>) -> Result<(), GameError> {
        self.schedule(fx, self.config.timing.connect_timeout(), TimerKind::ConnectTimeout);
        if self.registry.all_players_connected() {
            self.transition_to(GamePhase::ModeratorIntro, now, fx)?;
        }
        Ok(())
    }

    fn enter_intro(&mut self, fx: &mut Vec<Effect>) {
        self.schedule(fx, self.config.timing.intro_timeout(), TimerKind::IntroTimeout);
        let Some(moderator) = self.registry.moderator_id() else {
            return;
        };
        let players = self.roster_names();
        let instruction = render(&self.config.prompts.moderator_intro, &[("players", &players)]);
        self.request_utterance(moderator, instruction, false, fx);
    }

    fn enter_round(&mut self, now: Duration, fx: &mut Vec<Effect>) {
        let number = self.phase.round_number().unwrap_or(1);
        let timing = self.config.timing.clone();

        self.round_timer.start(now, timing.round());
        self.schedule(fx, timing.round(), TimerKind::RoundExpired);
        self.schedule(fx, timing.tick().min(timing.round()), TimerKind::RoundTick);

        if self.config.game.facilitator && !self.facilitator.is_some_and(|f| self.is_active_ai(f)) {
            self.facilitator = self.pick_facilitator();
        }
        if let Some(facilitator) = self.facilitator {
            fx.push(Effect::NotifySystemEvent {
                participants: vec![facilitator],
                text: format!("You are facilitating round {}.", number),
            });
        }
        self.notify_ais(fx, format!("Round {} has begun.", number));

        // Hold playback while the round banner is on screen, then let the
        // moderator announce the round.
        self.audio.hold(now + timing.banner_hold());
        self.schedule(fx, timing.banner_hold(), TimerKind::HoldExpired);
        let text = render(
            &self.config.prompts.round_announcement,
            &[
                ("round", &number.to_string()),
                ("seconds", &timing.round().as_secs().to_string()),
            ],
        );
        let announcement = self
            .registry
            .moderator()
            .map(|m| PlaybackItem::new(m.id, m.name.clone(), text, now));
        if let Some(item) = announcement {
            if self.audio.enqueue(item, now) == EnqueueOutcome::Started {
                self.begin_active(now, fx);
            }
        }

        if self.registry.human().is_some_and(|h| h.is_active()) {
            let seq = self.arbiter.silence_seq();
            self.schedule(fx, timing.human_silence(), TimerKind::HumanSilence { seq });
        }
        self.schedule(fx, timing.banner_hold() + timing.next_speaker_delay(), TimerKind::NextSpeaker);
    }

    fn enter_elimination(&mut self, now: Duration, fx: &mut Vec<Effect>) -> Result<(), GameError> {
        let voters = self.registry.active_players();
        self.votes.open(&voters, &voters);
        self.schedule(fx, self.config.timing.vote_timeout(), TimerKind::VoteTimeout);

        let roster = self.registry.active_roster();
        for voter in self.registry.active_ais() {
            self.request_vote(voter, &roster, fx);
        }

        if self.votes.progress() == VoteProgress::Complete {
            self.resolve_ballot(now, fx)?;
        }
        Ok(())
    }

    fn enter_verdict(&mut self, fx: &mut Vec<Effect>) {
        self.arbiter.block();
        self.schedule(fx, self.config.timing.verdict_timeout(), TimerKind::VerdictTimeout);

        let Some(moderator) = self.registry.moderator_id() else {
            return;
        };
        let survivors = self.roster_names();
        let human = self
            .registry
            .human()
            .map(|h| h.name.clone())
            .unwrap_or_else(|| "nobody".to_string());
        let instruction = render(
            &self.config.prompts.verdict,
            &[("survivors", &survivors), ("human", &human)],
        );
        self.request_utterance(moderator, instruction, true, fx);
    }

    fn next_phase(&self) -> Result<GamePhase, GameError> {
        self.phase.next().ok_or(GameError::IllegalTransition {
            from: self.phase,
            to: self.phase,
        })
    }

    fn finish_game(&mut self, now: Duration, fx: &mut Vec<Effect>) -> Result<(), GameError> {
        if self.outcome.is_none() {
            self.outcome = Some(match self.registry.human_id() {
                Some(_) => Outcome::HumanSurvived,
                None => Outcome::Concluded,
            });
        }
        self.transition_to(GamePhase::GameOver, now, fx)
    }

    // Voting.

    fn request_vote(&mut self, voter: ParticipantId, roster: &[(ParticipantId, String)], fx: &mut Vec<Effect>) {
        if self.in_flight.contains_key(&voter) {
            return;
        }
        let candidates: Vec<(ParticipantId, String)> = roster
            .iter()
            .filter(|(id, _)| *id != voter)
            .cloned()
            .collect();
        let names = candidates
            .iter()
            .map(|(_, name)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let instruction = render(&self.config.prompts.vote, &[("candidates", &names)]);

        let Some(speaker) = self.registry.get(voter) else {
            return;
        };
        let prompt = self.prompt_builder().build(speaker, instruction, false);
        let ticket = self.issue_ticket(voter);
        fx.push(Effect::RequestVote {
            ticket,
            prompt,
            candidates,
        });
        self.schedule(
            fx,
            self.config.timing.response_timeout(),
            TimerKind::ResponseTimeout {
                participant: voter,
                seq: ticket.seq,
            },
        );
    }

    fn resolve_ballot(&mut self, now: Duration, fx: &mut Vec<Effect>) -> Result<(), GameError> {
        let mut pool = self.registry.active_ais();
        if pool.is_empty() {
            pool = self.registry.remaining_ais();
        }
        let human = self.registry.human_id();

        let Some(outcome) = self.votes.resolve(&pool, human, &mut self.rng) else {
            warn!("nobody left to eliminate");
            return self.finish_game(now, fx);
        };
        info!(
            eliminated = %outcome.eliminated,
            resolution = ?outcome.resolution,
            human_identified = outcome.human_identified,
            "ballot resolved"
        );

        let reveal = self.config.timing.reveal();
        self.reveal_deadline = Some(now + reveal);
        self.schedule(fx, reveal, TimerKind::RevealElapsed);
        Ok(())
    }

    fn enact_reveal(&mut self, now: Duration, fx: &mut Vec<Effect>) -> Result<(), GameError> {
        let Some(outcome) = self.votes.outcome().cloned() else {
            return Ok(());
        };
        let name = self.registry.name_of(outcome.eliminated).to_string();

        if outcome.human_identified {
            self.outcome = Some(Outcome::HumanIdentified);
            self.notify_ais(fx, format!("{} was the human. The game is over.", name));
            return self.transition_to(GamePhase::GameOver, now, fx);
        }

        self.registry.eliminate(outcome.eliminated)?;
        info!(participant = %outcome.eliminated, name = %name, "eliminated");
        self.notify_ais(fx, format!("{} has been eliminated. They were an AI.", name));
        if self.facilitator == Some(outcome.eliminated) {
            self.facilitator = self.pick_facilitator();
        }

        let next = self.next_phase()?;
        self.transition_to(next, now, fx)
    }

    // Turn taking.

    fn take_turn(&mut self, now: Duration, fx: &mut Vec<Effect>) -> bool {
        if !self.phase.is_round()
            || self.human_typing
            || self.human_speaking
            || !self.audio.is_idle()
            || !self.in_flight.is_empty()
        {
            return false;
        }

        if let Some(pending) = self.arbiter.obligation() {
            let (participant, asker) = (pending.participant, pending.asker);
            if !self.is_active_ai(participant) {
                // The human owes an answer; the deadline timer handles it.
                return false;
            }
            let asker = self.registry.name_of(asker).to_string();
            let instruction = render(&self.config.prompts.answer, &[("asker", &asker)]);
            return self.request_utterance(participant, instruction, false, fx);
        }

        let candidates = self.registry.active_ais();
        let recent = self.log.recent_speakers(2);
        let mentioned = self.log.last().and_then(|last| {
            let roster: Vec<(ParticipantId, String)> = self
                .registry
                .active_roster()
                .into_iter()
                .filter(|(id, _)| *id != last.speaker_id && self.is_active_ai(*id))
                .collect();
            first_mentioned(&last.text, &roster)
        });

        let Some(next) = pick_next_speaker(&candidates, &recent, mentioned, &mut self.rng) else {
            return false;
        };
        debug!(speaker = %next, at = ?now, "next speaker chosen");
        let instruction = self.config.prompts.turn.clone();
        self.request_utterance(next, instruction, false, fx)
    }

    /// Inspect a freshly appended round entry for direct address. Returns
    /// whether an answer was requested from an AI.
    fn on_appended(&mut self, entry: EntryId, now: Duration, fx: &mut Vec<Effect>) -> bool {
        if !self.phase.is_round() {
            return false;
        }
        let Some(entry) = self.log.get(entry).cloned() else {
            return false;
        };
        let roster: Vec<(ParticipantId, String)> = self
            .registry
            .active_roster()
            .into_iter()
            .filter(|(id, _)| *id != entry.speaker_id)
            .collect();

        match self
            .arbiter
            .on_entry_appended(&entry, &roster, self.config.timing.obligation_deadline())
        {
            ObligationUpdate::Set(obligation) => {
                info!(
                    participant = %obligation.participant,
                    asker = %obligation.asker,
                    "direct question detected"
                );
                self.schedule(
                    fx,
                    obligation.deadline.saturating_sub(now),
                    TimerKind::ObligationDeadline { seq: obligation.seq },
                );
                if !self.is_active_ai(obligation.participant) {
                    return false;
                }
                let asker = self.registry.name_of(obligation.asker).to_string();
                let instruction = render(&self.config.prompts.answer, &[("asker", &asker)]);
                self.request_utterance(obligation.participant, instruction, false, fx)
            }
            ObligationUpdate::Resolved(obligation) => {
                debug!(participant = %obligation.participant, "obligation answered");
                false
            }
            ObligationUpdate::Unchanged => false,
        }
    }

    /// A collaborator produced nothing usable for `participant`.
    fn skip_turn(&mut self, participant: ParticipantId, now: Duration, fx: &mut Vec<Effect>) -> Result<bool, GameError> {
        match self.phase {
            GamePhase::ModeratorIntro if self.is_moderator(participant) => {
                self.transition_to(GamePhase::Round1, now, fx)?;
                Ok(true)
            }
            GamePhase::Verdict if self.is_moderator(participant) => {
                self.finish_game(now, fx)?;
                Ok(true)
            }
            _ => {
                self.nudge(fx);
                Ok(false)
            }
        }
    }

    fn watch_human_activity(&mut self, fx: &mut Vec<Effect>) {
        self.activity_seq += 1;
        let seq = self.activity_seq;
        self.schedule(fx, self.config.timing.human_activity_stale(), TimerKind::HumanActivityStale { seq });
    }

    fn clear_human_activity(&mut self) {
        self.human_typing = false;
        self.human_speaking = false;
        self.activity_seq += 1;
    }

    fn nudge(&self, fx: &mut Vec<Effect>) {
        if self.phase.is_round() && self.audio.is_idle() {
            self.schedule_next_speaker(fx);
        }
    }

    fn schedule_next_speaker(&self, fx: &mut Vec<Effect>) {
        let delay = if self.registry.active_ais().len() <= 1 {
            self.config.timing.one_on_one_delay()
        } else {
            self.config.timing.next_speaker_delay()
        };
        self.schedule(fx, delay, TimerKind::NextSpeaker);
    }

    fn request_utterance(
        &mut self,
        participant: ParticipantId,
        instruction: String,
        full_transcript: bool,
        fx: &mut Vec<Effect>,
    ) -> bool {
        if self.in_flight.contains_key(&participant) {
            return false;
        }
        let Some(speaker) = self.registry.get(participant) else {
            return false;
        };
        let prompt = self.prompt_builder().build(speaker, instruction, full_transcript);
        let ticket = self.issue_ticket(participant);
        fx.push(Effect::RequestUtterance { ticket, prompt });
        self.schedule(
            fx,
            self.config.timing.response_timeout(),
            TimerKind::ResponseTimeout {
                participant,
                seq: ticket.seq,
            },
        );
        true
    }

    fn issue_ticket(&mut self, participant: ParticipantId) -> Ticket {
        self.next_ticket += 1;
        self.in_flight.insert(participant, self.next_ticket);
        Ticket {
            epoch: self.epoch,
            seq: self.next_ticket,
            participant,
        }
    }

    /// Consume the in-flight entry matching `ticket`, if it is current.
    fn accept_ticket(&mut self, ticket: Ticket) -> bool {
        if ticket.epoch != self.epoch || self.in_flight.get(&ticket.participant) != Some(&ticket.seq) {
            return false;
        }
        self.in_flight.remove(&ticket.participant);
        true
    }

    // Audio.

    /// Start whatever the queue has next, if it can.
    fn pump_audio(&mut self, now: Duration, fx: &mut Vec<Effect>) {
        if self.audio.advance(now).is_some() {
            self.begin_active(now, fx);
        }
    }

    /// The queue just promoted an item: log it and start playing.
    fn begin_active(&mut self, now: Duration, fx: &mut Vec<Effect>) {
        let Some(active) = self.audio.active() else {
            return;
        };
        let (item, seq) = (active.item.clone(), active.seq);

        let entry = self
            .log
            .append(item.speaker_id, item.speaker_name.clone(), item.text.clone(), now);
        self.audio.set_active_entry(entry);

        let timeout = completion_timeout(&item.text, &self.config.audio);
        fx.push(Effect::PlayAudio(item));
        self.schedule(fx, timeout, TimerKind::PlaybackTimeout { seq });
        self.on_appended(entry, now, fx);
    }

    fn after_playback(&mut self, done: &ActivePlayback, now: Duration, fx: &mut Vec<Effect>) -> Result<(), GameError> {
        self.pump_audio(now, fx);
        if !self.audio.is_idle() {
            return Ok(());
        }
        let moderator_done = self.is_moderator(done.item.speaker_id);
        match self.phase {
            GamePhase::ModeratorIntro if moderator_done => self.transition_to(GamePhase::Round1, now, fx)?,
            GamePhase::Verdict if moderator_done => self.finish_game(now, fx)?,
            phase if phase.is_round() => self.schedule_next_speaker(fx),
            _ => {}
        }
        Ok(())
    }

    /// Interrupt the active speaker and drop the backlog. The interrupted
    /// line is removed from the log along with any obligation it created.
    fn cut_active(&mut self, fx: &mut Vec<Effect>) -> bool {
        let Some(cut) = self.audio.interrupt() else {
            return false;
        };
        fx.push(Effect::StopAudio(cut.item.speaker_id));
        if let Some(entry) = cut.entry {
            self.log.remove(entry);
            self.arbiter.forget_entry(entry);
        }
        true
    }

    // Helpers.

    fn schedule(&self, fx: &mut Vec<Effect>, delay: Duration, kind: TimerKind) {
        fx.push(Effect::Schedule {
            delay,
            timer: Timer {
                epoch: self.epoch,
                kind,
            },
        });
    }

    fn notify_ais(&self, fx: &mut Vec<Effect>, text: String) {
        let participants = self.registry.active_ais();
        if !participants.is_empty() {
            fx.push(Effect::NotifySystemEvent { participants, text });
        }
    }

    fn pick_facilitator(&mut self) -> Option<ParticipantId> {
        if !self.config.game.facilitator {
            return None;
        }
        let picked = self.registry.active_ais().choose(&mut self.rng).copied();
        if let Some(id) = picked {
            info!(facilitator = %id, "facilitator chosen");
        }
        picked
    }

    fn prompt_builder(&self) -> PromptBuilder<'_> {
        PromptBuilder {
            config: &self.config,
            registry: &self.registry,
            log: &self.log,
            facilitator: self.facilitator,
        }
    }

    fn roster_names(&self) -> String {
        self.registry
            .active_roster()
            .into_iter()
            .map(|(_, name)| name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn is_active_ai(&self, id: ParticipantId) -> bool {
        self.registry.get(id).is_some_and(|p| p.is_ai() && p.is_active())
    }

    fn is_moderator(&self, id: ParticipantId) -> bool {
        self.registry.moderator_id() == Some(id)
    }

    fn rejected(&self, action: &'static str) -> GameError {
        GameError::PhaseRejected {
            phase: self.phase,
            action,
        }
    }
}

fn as_millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
