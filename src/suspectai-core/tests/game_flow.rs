//! Whole-game scenarios driven through `PhaseStateMachine::advance`.

use std::collections::HashMap;
use std::time::Duration;

use suspectai_core::vote::Resolution;
use suspectai_core::{
    Effect, GameError, GamePhase, InboundEvent, Outcome, Participant, ParticipantId, ParticipantKind,
    PhaseStateMachine, Ticket, Timer, TimerKind, default_config,
};

const SAM: ParticipantId = ParticipantId(0);
const ADA: ParticipantId = ParticipantId(1);
const BO: ParticipantId = ParticipantId(2);
const CY: ParticipantId = ParticipantId(3);
const HOST: ParticipantId = ParticipantId(4);

struct Game {
    machine: PhaseStateMachine,
    now: Duration,
}

impl Game {
    fn new() -> Self {
        let mut config = default_config();
        config.game.seed = Some(42);
        let participants = vec![
            Participant::new(SAM, "Sam", ParticipantKind::Human),
            Participant::new(ADA, "Ada", ParticipantKind::Ai).with_model("m"),
            Participant::new(BO, "Bo", ParticipantKind::Ai).with_model("m"),
            Participant::new(CY, "Cy", ParticipantKind::Ai).with_model("m"),
            Participant::new(HOST, "Host", ParticipantKind::Moderator).with_model("m"),
        ];
        Self {
            machine: PhaseStateMachine::new(config, participants).unwrap(),
            now: Duration::ZERO,
        }
    }

    fn wait(&mut self, secs: u64) {
        self.now += Duration::from_secs(secs);
    }

    fn send(&mut self, event: InboundEvent) -> Vec<Effect> {
        self.machine.advance(event, self.now).unwrap()
    }

    fn fire(&mut self, kind: TimerKind) -> Vec<Effect> {
        let timer = Timer {
            epoch: self.machine.epoch(),
            kind,
        };
        self.send(InboundEvent::Timer(timer))
    }

    fn say(&mut self, ticket: Ticket, text: &str) -> Vec<Effect> {
        self.send(InboundEvent::UtteranceReady {
            ticket,
            text: text.to_string(),
        })
    }

    fn vote(&mut self, ticket: Ticket, target: ParticipantId) -> Vec<Effect> {
        self.send(InboundEvent::VoteCast { ticket, target })
    }

    /// Lobby to round one, with the round announcement played out.
    fn to_round_one(&mut self) {
        self.send(InboundEvent::Start);
        let mut fx = Vec::new();
        for id in [SAM, ADA, BO, CY] {
            fx = self.send(InboundEvent::Connect(id));
        }
        let intro = utterance_requests(&fx)[0];
        assert_eq!(intro.participant, HOST);

        self.wait(1);
        self.say(intro, "Good evening, callers.");
        self.wait(4);
        self.send(InboundEvent::PlaybackFinished(HOST));
        assert_eq!(self.machine.phase(), GamePhase::Round1);
        self.finish_announcement();
    }

    fn finish_announcement(&mut self) {
        self.wait(3);
        self.fire(TimerKind::HoldExpired);
        assert_eq!(self.machine.audio().active_speaker(), Some(HOST));
        self.wait(3);
        self.send(InboundEvent::PlaybackFinished(HOST));
    }

    /// Expire the current round; returns the vote tickets by voter.
    fn expire_round(&mut self) -> HashMap<ParticipantId, Ticket> {
        self.wait(90);
        let fx = self.fire(TimerKind::RoundExpired);
        vote_requests(&fx)
    }

    fn reveal(&mut self) -> Vec<Effect> {
        self.wait(5);
        self.fire(TimerKind::RevealElapsed)
    }
}

fn utterance_requests(fx: &[Effect]) -> Vec<Ticket> {
    fx.iter()
        .filter_map(|e| match e {
            Effect::RequestUtterance { ticket, .. } => Some(*ticket),
            _ => None,
        })
        .collect()
}

fn scheduled(fx: &[Effect], pred: impl Fn(&TimerKind) -> bool) -> Option<TimerKind> {
    fx.iter().find_map(|e| match e {
        Effect::Schedule { timer, .. } if pred(&timer.kind) => Some(timer.kind),
        _ => None,
    })
}

fn vote_requests(fx: &[Effect]) -> HashMap<ParticipantId, Ticket> {
    fx.iter()
        .filter_map(|e| match e {
            Effect::RequestVote { ticket, .. } => Some((ticket.participant, *ticket)),
            _ => None,
        })
        .collect()
}

#[test]
fn round_expiry_interrupts_speaker_and_drops_their_line() {
    let mut game = Game::new();
    game.to_round_one();

    let fx = game.fire(TimerKind::NextSpeaker);
    let ticket = utterance_requests(&fx)[0];
    let speaker = ticket.participant;
    game.say(ticket, "Let me tell you a very long story about my circuits.");
    assert_eq!(game.machine.audio().active_speaker(), Some(speaker));
    assert!(game.machine.log().transcript().iter().any(|e| e.text.contains("circuits")));

    let fx = game.fire(TimerKind::RoundExpired);
    assert_eq!(game.machine.phase(), GamePhase::Elimination1);
    assert!(fx.iter().any(|e| matches!(e, Effect::StopAudio(id) if *id == speaker)));
    assert!(!game.machine.log().transcript().iter().any(|e| e.text.contains("circuits")));
    assert!(game.machine.audio().is_idle());
    assert_eq!(vote_requests(&fx).len(), 3);
}

#[test]
fn human_voted_out_loses_after_reveal_delay() {
    let mut game = Game::new();
    game.to_round_one();
    let tickets = game.expire_round();

    game.vote(tickets[&ADA], SAM);
    game.vote(tickets[&BO], SAM);
    game.vote(tickets[&CY], BO);
    assert!(game.machine.votes().is_open());

    game.wait(30);
    game.fire(TimerKind::VoteTimeout);
    let outcome = game.machine.votes().outcome().cloned().unwrap();
    assert_eq!(outcome.eliminated, SAM);
    assert!(outcome.human_identified);
    // Results are published before anything is enacted.
    assert_eq!(game.machine.phase(), GamePhase::Elimination1);
    assert!(game.machine.snapshot(game.now).reveal_deadline_ms.is_some());

    game.reveal();
    assert_eq!(game.machine.phase(), GamePhase::GameOver);
    assert_eq!(game.machine.outcome(), Some(Outcome::HumanIdentified));

    let err = game
        .machine
        .advance(InboundEvent::HumanMessage("wait".to_string()), game.now)
        .unwrap_err();
    assert!(matches!(err, GameError::PhaseRejected { .. }));
}

#[test]
fn tie_never_eliminates_the_human() {
    let mut game = Game::new();
    game.to_round_one();
    let tickets = game.expire_round();

    game.vote(tickets[&ADA], SAM);
    game.vote(tickets[&BO], ADA);
    game.vote(tickets[&CY], SAM);
    game.send(InboundEvent::HumanVote(ADA));

    let outcome = game.machine.votes().outcome().cloned().unwrap();
    assert_eq!(outcome.eliminated, ADA);
    assert_eq!(outcome.resolution, Resolution::TieBreak);
    assert!(!outcome.human_identified);

    game.reveal();
    assert_eq!(game.machine.phase(), GamePhase::Round2);
    assert!(game.machine.registry().get(ADA).unwrap().eliminated);
    assert!(!game.machine.registry().active_ais().contains(&ADA));
}

#[test]
fn missed_answer_is_called_out_exactly_once() {
    let mut game = Game::new();
    game.to_round_one();

    let fx = game.send(InboundEvent::HumanMessage("Ada, what do you think?".to_string()));
    let ticket = utterance_requests(&fx)[0];
    assert_eq!(ticket.participant, ADA);

    game.wait(1);
    game.say(ticket, "Sam, where were you last night?");
    let obligation = game.machine.arbiter().obligation().cloned().unwrap();
    assert_eq!(obligation.participant, SAM);
    assert_eq!(obligation.asker, ADA);

    game.wait(3);
    game.send(InboundEvent::PlaybackFinished(ADA));
    // Nobody else takes a turn while the human owes an answer.
    assert!(utterance_requests(&game.fire(TimerKind::NextSpeaker)).is_empty());

    game.wait(7);
    let fx = game.fire(TimerKind::ObligationDeadline { seq: obligation.seq });
    let callouts = utterance_requests(&fx);
    assert_eq!(callouts.len(), 1);
    assert_eq!(callouts[0].participant, ADA);
    assert!(game.machine.arbiter().obligation().is_none());

    let fx = game.fire(TimerKind::ObligationDeadline { seq: obligation.seq });
    assert!(utterance_requests(&fx).is_empty());
}

#[test]
fn late_intro_line_is_discarded_after_timeout() {
    let mut game = Game::new();
    game.send(InboundEvent::Start);
    let mut fx = Vec::new();
    for id in [SAM, ADA, BO, CY] {
        fx = game.send(InboundEvent::Connect(id));
    }
    let intro = utterance_requests(&fx)[0];

    game.wait(45);
    game.fire(TimerKind::IntroTimeout);
    assert_eq!(game.machine.phase(), GamePhase::Round1);

    let fx = game.say(intro, "Sorry, I'm late. Welcome!");
    assert!(fx.is_empty());
    assert!(game.machine.log().is_empty());
}

#[test]
fn disconnecting_voter_can_complete_the_ballot() {
    let mut game = Game::new();
    game.to_round_one();
    let tickets = game.expire_round();

    game.vote(tickets[&ADA], BO);
    game.vote(tickets[&BO], CY);
    game.send(InboundEvent::HumanVote(BO));
    assert!(game.machine.votes().is_open());

    game.send(InboundEvent::Disconnect(CY));
    let outcome = game.machine.votes().outcome().cloned().unwrap();
    assert_eq!(outcome.eliminated, BO);
    assert_eq!(outcome.resolution, Resolution::Majority);
}

#[test]
fn full_game_follows_the_phase_order() {
    let mut game = Game::new();
    game.to_round_one();

    let tickets = game.expire_round();
    game.send(InboundEvent::HumanVote(ADA));
    game.vote(tickets[&ADA], BO);
    game.vote(tickets[&BO], ADA);
    game.vote(tickets[&CY], ADA);
    game.reveal();
    assert_eq!(game.machine.phase(), GamePhase::Round2);
    game.finish_announcement();

    let tickets = game.expire_round();
    assert_eq!(tickets.len(), 2);
    game.send(InboundEvent::HumanVote(BO));
    game.vote(tickets[&BO], CY);
    game.vote(tickets[&CY], BO);
    game.reveal();
    assert_eq!(game.machine.phase(), GamePhase::Round3);

    game.wait(90);
    let fx = game.fire(TimerKind::RoundExpired);
    assert_eq!(game.machine.phase(), GamePhase::Verdict);
    let verdict = utterance_requests(&fx)[0];
    assert_eq!(verdict.participant, HOST);

    game.say(verdict, "Sam was the human all along, and survived!");
    game.wait(10);
    game.send(InboundEvent::PlaybackFinished(HOST));
    assert_eq!(game.machine.outcome(), Some(Outcome::HumanSurvived));

    let expected = [
        GamePhase::Lobby,
        GamePhase::Connecting,
        GamePhase::ModeratorIntro,
        GamePhase::Round1,
        GamePhase::Elimination1,
        GamePhase::Round2,
        GamePhase::Elimination2,
        GamePhase::Round3,
        GamePhase::Verdict,
        GamePhase::GameOver,
    ];
    assert_eq!(game.machine.history(), &expected);
    assert!(game
        .machine
        .history()
        .windows(2)
        .all(|pair| pair[0].can_transition_to(pair[1])));
}

#[test]
fn human_leaving_mid_typing_does_not_silence_the_ais() {
    let mut game = Game::new();
    game.to_round_one();

    game.send(InboundEvent::HumanTypingStart);
    assert!(utterance_requests(&game.fire(TimerKind::NextSpeaker)).is_empty());

    let fx = game.send(InboundEvent::Disconnect(SAM));
    assert!(scheduled(&fx, |k| *k == TimerKind::NextSpeaker).is_some());
    let fx = game.fire(TimerKind::NextSpeaker);
    assert_eq!(utterance_requests(&fx).len(), 1);
}

#[test]
fn stale_speaking_indicator_releases_turns() {
    let mut game = Game::new();
    game.to_round_one();

    let first = scheduled(&game.send(InboundEvent::HumanSpeakingStart), |k| {
        matches!(k, TimerKind::HumanActivityStale { .. })
    })
    .unwrap();
    // A fresh indicator supersedes the first watch.
    game.wait(10);
    let second = scheduled(&game.send(InboundEvent::HumanSpeakingStart), |k| {
        matches!(k, TimerKind::HumanActivityStale { .. })
    })
    .unwrap();

    game.wait(5);
    assert!(game.fire(first).is_empty());
    assert!(utterance_requests(&game.fire(TimerKind::NextSpeaker)).is_empty());

    game.wait(10);
    let fx = game.fire(second);
    assert!(scheduled(&fx, |k| *k == TimerKind::NextSpeaker).is_some());
    assert_eq!(utterance_requests(&game.fire(TimerKind::NextSpeaker)).len(), 1);
}

#[test]
fn quiet_human_is_prompted_once_per_round() {
    let mut game = Game::new();
    game.to_round_one();
    let seq = game.machine.arbiter().silence_seq();

    game.wait(30);
    let fx = game.fire(TimerKind::HumanSilence { seq });
    let prompts = utterance_requests(&fx);
    assert_eq!(prompts.len(), 1);
    assert_eq!(Some(prompts[0].participant), game.machine.facilitator());

    assert!(utterance_requests(&game.fire(TimerKind::HumanSilence { seq })).is_empty());

    game.send(InboundEvent::HumanMessage("ok fine".to_string()));
    let rearmed = game.machine.arbiter().silence_seq();
    assert_ne!(rearmed, seq);
    game.wait(30);
    assert!(utterance_requests(&game.fire(TimerKind::HumanSilence { seq: rearmed })).is_empty());
}

#[test]
fn stuck_playback_is_forced_complete() {
    let mut game = Game::new();
    game.to_round_one();

    let ticket = utterance_requests(&game.fire(TimerKind::NextSpeaker))[0];
    let speaker = ticket.participant;
    let fx = game.say(ticket, "I spent the afternoon sorting my sock drawer.");
    let timeout = scheduled(&fx, |k| matches!(k, TimerKind::PlaybackTimeout { .. })).unwrap();

    game.wait(40);
    let fx = game.fire(timeout);
    assert!(fx.iter().any(|e| matches!(e, Effect::StopAudio(id) if *id == speaker)));
    assert!(game.machine.audio().is_idle());
    assert!(scheduled(&fx, |k| *k == TimerKind::NextSpeaker).is_some());
    // Forced completion keeps the line; only interruptions remove it.
    assert!(game.machine.log().transcript().iter().any(|e| e.text.contains("sock drawer")));

    assert!(game.send(InboundEvent::PlaybackFinished(speaker)).is_empty());
}

#[test]
fn silent_collaborator_loses_the_turn() {
    let mut game = Game::new();
    game.to_round_one();

    let ticket = utterance_requests(&game.fire(TimerKind::NextSpeaker))[0];
    game.wait(30);
    let fx = game.fire(TimerKind::ResponseTimeout {
        participant: ticket.participant,
        seq: ticket.seq,
    });
    assert!(scheduled(&fx, |k| *k == TimerKind::NextSpeaker).is_some());

    game.wait(1);
    assert!(game.say(ticket, "Sorry, what was the question?").is_empty());
    assert!(game.machine.audio().is_idle());
    assert_eq!(utterance_requests(&game.fire(TimerKind::NextSpeaker)).len(), 1);
}

#[test]
fn empty_ballot_box_eliminates_a_random_ai() {
    let mut game = Game::new();
    game.to_round_one();
    game.expire_round();

    game.wait(30);
    game.fire(TimerKind::VoteTimeout);
    let outcome = game.machine.votes().outcome().cloned().unwrap();
    assert_eq!(outcome.resolution, Resolution::Fallback);
    assert_ne!(outcome.eliminated, SAM);
    assert!(!outcome.human_identified);

    game.reveal();
    assert_eq!(game.machine.phase(), GamePhase::Round2);
    assert!(game.machine.registry().get(outcome.eliminated).unwrap().eliminated);
}

#[test]
fn unanswered_human_question_is_called_out_by_another_ai() {
    let mut game = Game::new();
    game.to_round_one();

    game.send(InboundEvent::HumanMessage("Ada, what do you think?".to_string()));
    let obligation = game.machine.arbiter().obligation().cloned().unwrap();
    assert_eq!(obligation.participant, ADA);
    assert_eq!(obligation.asker, SAM);

    game.wait(7);
    let fx = game.fire(TimerKind::ObligationDeadline { seq: obligation.seq });
    let callouts = utterance_requests(&fx);
    assert_eq!(callouts.len(), 1);
    assert!([BO, CY].contains(&callouts[0].participant));
    assert!(game.machine.arbiter().obligation().is_none());
}

#[test]
fn later_ai_is_picked_when_the_human_is_named_first() {
    let mut game = Game::new();
    game.to_round_one();

    let ticket = utterance_requests(&game.fire(TimerKind::NextSpeaker))[0];
    let speaker = ticket.participant;
    let named = [ADA, BO, CY].into_iter().find(|id| *id != speaker).unwrap();
    let name = game.machine.registry().name_of(named).to_string();
    game.say(ticket, &format!("Sam seems nervous, and so does {}.", name));
    game.wait(4);
    game.send(InboundEvent::PlaybackFinished(speaker));

    let fx = game.fire(TimerKind::NextSpeaker);
    assert_eq!(utterance_requests(&fx)[0].participant, named);
}
