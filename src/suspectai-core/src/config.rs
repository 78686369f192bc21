//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::GameError;
use crate::participant::{Participant, ParticipantId, ParticipantKind};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub game: GameSettings,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default = "default_roster")]
    pub roster: Vec<RosterEntry>,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// General game settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Flavor for the conversation, passed to every persona.
    pub theme: String,
    /// Fixed RNG seed for reproducible games.
    pub seed: Option<u64>,
    /// Give one AI per round extra instructions to keep turns moving.
    pub facilitator: bool,
    /// How many recent entries snapshots and prompts carry.
    pub conversation_window: usize,
    /// Completion budget for a single spoken turn.
    pub max_tokens: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            theme: "A late-night radio call-in show about strange lights in the sky".to_string(),
            seed: None,
            facilitator: true,
            conversation_window: 12,
            max_tokens: 160,
        }
    }
}

/// Phase and turn timings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub round_secs: u64,
    pub tick_secs: u64,
    pub obligation_deadline_secs: u64,
    pub human_silence_secs: u64,
    pub reveal_secs: u64,
    pub vote_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub intro_timeout_secs: u64,
    pub verdict_timeout_secs: u64,
    pub response_timeout_secs: u64,
    /// A typing or speaking indicator older than this is treated as stopped.
    pub human_activity_stale_secs: u64,
    pub banner_hold_ms: u64,
    pub next_speaker_delay_ms: u64,
    pub one_on_one_delay_ms: u64,
    pub reply_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            round_secs: 90,
            tick_secs: 1,
            obligation_deadline_secs: 7,
            human_silence_secs: 30,
            reveal_secs: 5,
            vote_timeout_secs: 30,
            connect_timeout_secs: 20,
            intro_timeout_secs: 45,
            verdict_timeout_secs: 60,
            response_timeout_secs: 30,
            human_activity_stale_secs: 15,
            banner_hold_ms: 2500,
            next_speaker_delay_ms: 1200,
            one_on_one_delay_ms: 2600,
            reply_delay_ms: 400,
        }
    }
}

impl TimingConfig {
    pub fn round(&self) -> Duration {
        Duration::from_secs(self.round_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn obligation_deadline(&self) -> Duration {
        Duration::from_secs(self.obligation_deadline_secs)
    }

    pub fn human_silence(&self) -> Duration {
        Duration::from_secs(self.human_silence_secs)
    }

    pub fn reveal(&self) -> Duration {
        Duration::from_secs(self.reveal_secs)
    }

    pub fn vote_timeout(&self) -> Duration {
        Duration::from_secs(self.vote_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn intro_timeout(&self) -> Duration {
        Duration::from_secs(self.intro_timeout_secs)
    }

    pub fn verdict_timeout(&self) -> Duration {
        Duration::from_secs(self.verdict_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn human_activity_stale(&self) -> Duration {
        Duration::from_secs(self.human_activity_stale_secs)
    }

    pub fn banner_hold(&self) -> Duration {
        Duration::from_millis(self.banner_hold_ms)
    }

    pub fn next_speaker_delay(&self) -> Duration {
        Duration::from_millis(self.next_speaker_delay_ms)
    }

    pub fn one_on_one_delay(&self) -> Duration {
        Duration::from_millis(self.one_on_one_delay_ms)
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }
}

/// Playback queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Backlog depth at which the whole queue is discarded.
    pub queue_cap: usize,
    /// Speaking rate used to estimate playback duration.
    pub words_per_second: f32,
    /// Safety factor applied to the estimate for the completion timeout.
    pub duration_multiplier: f32,
    pub slack_ms: u64,
    /// Absolute completion timeout regardless of the estimate.
    pub hard_ceiling_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            queue_cap: 3,
            words_per_second: 2.6,
            duration_multiplier: 2.0,
            slack_ms: 1500,
            hard_ceiling_secs: 40,
        }
    }
}

/// One seat at the table.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub kind: ParticipantKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
}

impl RosterEntry {
    fn new(name: &str, kind: ParticipantKind, persona: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            model: None,
            persona: persona.map(str::to_string),
        }
    }
}

fn default_roster() -> Vec<RosterEntry> {
    vec![
        RosterEntry::new("Riley", ParticipantKind::Human, None),
        RosterEntry::new(
            "Ada",
            ParticipantKind::Ai,
            Some("A dry, precise retired air-traffic controller who distrusts vague answers."),
        ),
        RosterEntry::new(
            "Bram",
            ParticipantKind::Ai,
            Some("A cheerful night-shift baker who over-shares and jumps to conclusions."),
        ),
        RosterEntry::new(
            "Cleo",
            ParticipantKind::Ai,
            Some("A sharp-tongued podcast host who loves catching people in contradictions."),
        ),
        RosterEntry::new(
            "Dex",
            ParticipantKind::Ai,
            Some("A laconic long-haul trucker who answers questions with questions."),
        ),
        RosterEntry::new("Mira", ParticipantKind::Moderator, None),
    ]
}

/// Prompt templates. Placeholders are written as `{name}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// System prompt for every AI suspect.
    pub ai_persona: String,
    /// System prompt for the moderator.
    pub moderator_persona: String,
    pub moderator_intro: String,
    /// Spoken verbatim by the moderator at the start of each round.
    pub round_announcement: String,
    /// Appended to the facilitator's instructions.
    pub facilitator: String,
    pub turn: String,
    pub answer: String,
    pub missed_answer: String,
    pub quiet_player: String,
    pub vote: String,
    pub verdict: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            ai_persona: DEFAULT_AI_PERSONA.to_string(),
            moderator_persona: DEFAULT_MODERATOR_PERSONA.to_string(),
            moderator_intro: "Open the show. Greet the callers by name ({players}), explain that one of them is secretly a human pretending to be an AI, and that there will be three rounds of questioning with a vote after the first two.".to_string(),
            round_announcement: "Round {round}. You have {seconds} seconds. Find the human.".to_string(),
            facilitator: "You are also this round's facilitator: keep the conversation moving, and when someone has been quiet, ask them a direct question by name.".to_string(),
            turn: "It's your turn to speak. React to what was just said.".to_string(),
            answer: "{asker} just asked you something directly. Answer them.".to_string(),
            missed_answer: "{silent} was asked a direct question and never answered. Call that out and keep the debate going.".to_string(),
            quiet_player: "{quiet} hasn't said anything in a while. Pull them into the conversation with a pointed question.".to_string(),
            vote: "Voting time. The candidates are: {candidates}. Reply with only the name of the player you believe is the human.".to_string(),
            verdict: "The questioning is over. Survivors: {survivors}. The human was {human}. Deliver a short, dramatic final verdict that recaps the key moments and reveals the human.".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GameError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| GameError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, GameError> {
        toml::from_str(content)
            .map_err(|e| GameError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Turn the roster into participants, filling in `default_model` for
    /// AI and moderator seats that do not name one.
    pub fn participants(&self, default_model: &str) -> Vec<Participant> {
        self.roster
            .iter()
            .enumerate()
            .map(|(slot, entry)| {
                let mut p = Participant::new(ParticipantId(slot as u32), &entry.name, entry.kind);
                if entry.kind != ParticipantKind::Human {
                    p = p.with_model(entry.model.as_deref().unwrap_or(default_model));
                }
                if let Some(persona) = &entry.persona {
                    p = p.with_persona(persona);
                }
                p
            })
            .collect()
    }

    /// Rename the human seat.
    pub fn set_human_name(&mut self, name: &str) {
        if let Some(entry) = self
            .roster
            .iter_mut()
            .find(|e| e.kind == ParticipantKind::Human)
        {
            entry.name = name.to_string();
        }
    }
}

/// Replace `{key}` placeholders in `template`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        game: GameSettings::default(),
        timing: TimingConfig::default(),
        audio: AudioConfig::default(),
        roster: default_roster(),
        prompts: PromptsConfig::default(),
    }
}

const DEFAULT_AI_PERSONA: &str = r#"You are {name}, a caller on a live show.

THEME: {theme}

THE GAME: Every caller claims to be an AI. Exactly one of them is secretly a human.
Work out who the human is through conversation. Other callers: {others}.

{persona}

CONVERSATION RULES:
- Speak in one to three short sentences, like a real voice conversation
- Address people by name when you ask them something
- Press on evasive or oddly human answers
- Never admit or hint that you are an AI or a human; just play the game

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words - no scene directions or stage actions
- Do NOT include any text in parentheses or asterisks
- Do NOT prefix your answer with your own name
"#;

const DEFAULT_MODERATOR_PERSONA: &str = r#"You are {name}, the host of a late-night live show.

THEME: {theme}

You frame the game, keep the tone playful and tense, and deliver the final verdict.

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words - no scene directions or stage actions
- Keep it under six sentences
"#;
