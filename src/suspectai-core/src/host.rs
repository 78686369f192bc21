//! Async runtime around the state machine.
//!
//! A single [`GameHost`] task owns the [`PhaseStateMachine`] and feeds it
//! events one at a time from an mpsc channel. Effects are executed here:
//! timers become sleeping tasks grouped by epoch, collaborator requests are
//! spawned against the [`Responder`], and everything front-ends care about
//! goes out on a broadcast channel as [`HostEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::audio_queue::PlaybackItem;
use crate::error::GameError;
use crate::event::{Effect, InboundEvent, Outcome, Snapshot};
use crate::machine::PhaseStateMachine;
use crate::participant::ParticipantId;
use crate::phase::GamePhase;
use crate::responder::Responder;
use crate::timer::Timer;

/// Inbound queue capacity.
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Outbound broadcast capacity.
const BROADCAST_CAPACITY: usize = 256;

/// What the host publishes to front-ends.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Snapshot(Snapshot),
    PhaseChanged { from: GamePhase, to: GamePhase },
    PlayAudio(PlaybackItem),
    StopAudio(ParticipantId),
    SystemNotice { participants: Vec<ParticipantId>, text: String },
    /// An inbound event was refused.
    Rejected(String),
}

/// Sleeping timer and request tasks, grouped by the epoch that created them.
pub struct Scheduler {
    tx: mpsc::Sender<InboundEvent>,
    tasks: HashMap<u64, Vec<AbortHandle>>,
}

impl Scheduler {
    pub fn new(tx: mpsc::Sender<InboundEvent>) -> Self {
        Self {
            tx,
            tasks: HashMap::new(),
        }
    }

    /// Deliver `timer` back to the machine after `delay`.
    pub fn schedule(&mut self, delay: Duration, timer: Timer) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(InboundEvent::Timer(timer)).await;
        })
        .abort_handle();
        self.track(timer.epoch, handle);
    }

    /// Tie an arbitrary task to `epoch` so it is aborted with it.
    pub fn track(&mut self, epoch: u64, handle: AbortHandle) {
        let handles = self.tasks.entry(epoch).or_default();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn cancel_epoch(&mut self, epoch: u64) {
        if let Some(handles) = self.tasks.remove(&epoch) {
            debug!(epoch, count = handles.len(), "cancelling epoch tasks");
            for handle in handles {
                handle.abort();
            }
        }
    }

    /// Tasks for `epoch` that have not completed yet.
    pub fn pending(&self, epoch: u64) -> usize {
        self.tasks
            .get(&epoch)
            .map(|handles| handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }

    pub fn shutdown(&mut self) {
        for (_, handles) in self.tasks.drain() {
            for handle in handles {
                handle.abort();
            }
        }
    }
}

/// Cheap, cloneable sender for front-ends.
#[derive(Clone)]
pub struct GameHandle {
    tx: mpsc::Sender<InboundEvent>,
    events: broadcast::Sender<HostEvent>,
}

impl GameHandle {
    pub async fn send(&self, event: InboundEvent) -> Result<(), GameError> {
        self.tx.send(event).await.map_err(|_| GameError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self) -> Result<(), GameError> {
        self.send(InboundEvent::Start).await
    }

    pub async fn connect(&self, id: ParticipantId) -> Result<(), GameError> {
        self.send(InboundEvent::Connect(id)).await
    }

    pub async fn disconnect(&self, id: ParticipantId) -> Result<(), GameError> {
        self.send(InboundEvent::Disconnect(id)).await
    }

    pub async fn human_message(&self, text: impl Into<String>) -> Result<(), GameError> {
        self.send(InboundEvent::HumanMessage(text.into())).await
    }

    pub async fn human_vote(&self, target: ParticipantId) -> Result<(), GameError> {
        self.send(InboundEvent::HumanVote(target)).await
    }

    pub async fn typing(&self, active: bool) -> Result<(), GameError> {
        let event = if active {
            InboundEvent::HumanTypingStart
        } else {
            InboundEvent::HumanTypingStop
        };
        self.send(event).await
    }

    pub async fn speaking(&self, active: bool) -> Result<(), GameError> {
        let event = if active {
            InboundEvent::HumanSpeakingStart
        } else {
            InboundEvent::HumanSpeakingStop
        };
        self.send(event).await
    }

    pub async fn playback_finished(&self, speaker: ParticipantId) -> Result<(), GameError> {
        self.send(InboundEvent::PlaybackFinished(speaker)).await
    }
}

pub struct GameHost {
    machine: PhaseStateMachine,
    responder: Arc<dyn Responder>,
    rx: mpsc::Receiver<InboundEvent>,
    tx: mpsc::Sender<InboundEvent>,
    events: broadcast::Sender<HostEvent>,
    scheduler: Scheduler,
    origin: Instant,
}

impl GameHost {
    pub fn new(machine: PhaseStateMachine, responder: Arc<dyn Responder>) -> (Self, GameHandle) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let handle = GameHandle {
            tx: tx.clone(),
            events: events.clone(),
        };
        let host = Self {
            machine,
            responder,
            rx,
            scheduler: Scheduler::new(tx.clone()),
            tx,
            events,
            origin: Instant::now(),
        };
        (host, handle)
    }

    pub fn machine(&self) -> &PhaseStateMachine {
        &self.machine
    }

    /// Process events until the game is over. Returns how it ended.
    pub async fn run(mut self) -> Result<Option<Outcome>, GameError> {
        while let Some(event) = self.rx.recv().await {
            let now = self.origin.elapsed();
            let name = event.name();

            match self.machine.advance(event, now) {
                Ok(effects) => {
                    for effect in effects {
                        self.execute(effect).await;
                    }
                }
                Err(e @ GameError::IllegalTransition { .. }) => {
                    self.scheduler.shutdown();
                    return Err(e);
                }
                Err(e) => {
                    warn!(event = name, error = %e, "event rejected");
                    self.publish(HostEvent::Rejected(e.to_string()));
                }
            }

            if self.machine.phase().is_terminal() {
                break;
            }
        }

        self.scheduler.shutdown();
        Ok(self.machine.outcome())
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::RequestUtterance { ticket, prompt } => {
                let Some(speaker) = self.machine.registry().get(ticket.participant).cloned() else {
                    return;
                };
                let responder = Arc::clone(&self.responder);
                let tx = self.tx.clone();
                let handle = tokio::spawn(async move {
                    let text = match responder.utterance(&speaker, &prompt).await {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(speaker = %speaker.name, error = %e, "utterance request failed");
                            String::new()
                        }
                    };
                    let _ = tx.send(InboundEvent::UtteranceReady { ticket, text }).await;
                })
                .abort_handle();
                self.scheduler.track(ticket.epoch, handle);
            }
            Effect::RequestVote {
                ticket,
                prompt,
                candidates,
            } => {
                let Some(voter) = self.machine.registry().get(ticket.participant).cloned() else {
                    return;
                };
                let responder = Arc::clone(&self.responder);
                let tx = self.tx.clone();
                let handle = tokio::spawn(async move {
                    match responder.vote(&voter, &prompt, &candidates).await {
                        Ok(Some(target)) => {
                            let _ = tx.send(InboundEvent::VoteCast { ticket, target }).await;
                        }
                        Ok(None) => warn!(voter = %voter.name, "vote named no candidate"),
                        Err(e) => warn!(voter = %voter.name, error = %e, "vote request failed"),
                    }
                })
                .abort_handle();
                self.scheduler.track(ticket.epoch, handle);
            }
            Effect::NotifySystemEvent { participants, text } => {
                for participant in &participants {
                    self.responder.notify(*participant, &text).await;
                }
                self.publish(HostEvent::SystemNotice { participants, text });
            }
            Effect::PlayAudio(item) => self.publish(HostEvent::PlayAudio(item)),
            Effect::StopAudio(speaker) => self.publish(HostEvent::StopAudio(speaker)),
            Effect::Schedule { delay, timer } => self.scheduler.schedule(delay, timer),
            Effect::CancelTimers { epoch } => self.scheduler.cancel_epoch(epoch),
            Effect::PhaseChanged { from, to } => self.publish(HostEvent::PhaseChanged { from, to }),
            Effect::Broadcast(snapshot) => self.publish(HostEvent::Snapshot(snapshot)),
        }
    }

    fn publish(&self, event: HostEvent) {
        // No subscribers is fine.
        if self.events.send(event).is_err() {
            debug!("host event dropped (no subscribers)");
        }
    }
}
