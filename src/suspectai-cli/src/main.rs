//! SuspectAI CLI - find the human among the AIs.
//!
//! Plays one game in the terminal: AI lines are printed as they would be
//! spoken, and you type your answers on stdin.

use clap::Parser;
use colored::Colorize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use suspectai_core::{
    Config, GameHandle, GameHost, GamePhase, HostEvent, OpenAiResponder, Outcome, Participant,
    ParticipantId, PhaseStateMachine, Responder, ScriptedResponder, Snapshot, default_config,
    estimate_speech_duration,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "suspectai",
    version,
    about = "SuspectAI - one human hides among AI callers",
    long_about = "A terminal game show: AI callers and one human answer questions, vote each other out, and try to find the human. Uses OpenAI-compatible APIs."
)]
struct Cli {
    /// Game configuration (TOML). Built-in defaults are used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Your name on the show
    #[arg(short, long, value_name = "NAME")]
    name: Option<String>,

    /// Model for AI seats that do not name one in the roster
    #[arg(short, long, default_value = "gpt-4o-mini", value_name = "MODEL")]
    model: String,

    /// Seed for speaker selection and tie-breaks
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Report each line finished as soon as it is printed
    #[arg(long)]
    no_voice_delay: bool,

    /// Use canned lines instead of calling a model
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(name) = &cli.name {
        config.set_human_name(name);
    }
    if cli.seed.is_some() {
        config.game.seed = cli.seed;
    }

    let responder: Arc<dyn Responder> = if cli.offline {
        Arc::new(ScriptedResponder::default())
    } else {
        let api_base = env::var("OPENAI_API_BASE")
            .or_else(|_| env::var("OPENAI_BASE_URL"))
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
            eprintln!(
                "{}",
                "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
            );
            String::new()
        });
        Arc::new(OpenAiResponder::new(&api_base, &api_key, &cli.model)?)
    };

    let words_per_second = config.audio.words_per_second;
    let theme = config.game.theme.clone();
    let machine = PhaseStateMachine::from_config(config, &cli.model)?;
    let roster: Vec<Participant> = machine.registry().participants().to_vec();

    print_header(&theme, &roster);

    let (host, handle) = GameHost::new(machine, responder);
    let events = handle.subscribe();
    let game = tokio::spawn(host.run());

    let voice_delay = !cli.no_voice_delay;
    tokio::spawn(render_events(events, handle.clone(), roster.clone(), words_per_second, voice_delay));

    let (quit_tx, quit_rx) = oneshot::channel();
    tokio::spawn(read_commands(handle.clone(), roster.clone(), quit_tx));

    handle.start().await?;
    for participant in &roster {
        handle.connect(participant.id).await?;
    }

    let outcome = tokio::select! {
        result = game => result??,
        Ok(()) = quit_rx => {
            println!();
            println!("{}", "  You hung up.".yellow());
            return Ok(());
        }
    };

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    let verdict = match outcome {
        Some(Outcome::HumanSurvived) => "  You made it. Nobody caught you.".bright_green().bold(),
        Some(Outcome::HumanIdentified) => "  Caught! The AIs found the human.".bright_red().bold(),
        Some(Outcome::Concluded) | None => "  Show's over.".bright_white().bold(),
    };
    println!("{}", verdict);
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

fn print_header(theme: &str, roster: &[Participant]) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", "SuspectAI".bold()).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Theme:".bold(), theme.bright_white());
    println!();
    println!("{}", "On the line:".bold());
    for p in roster {
        let model = p.model.as_deref().unwrap_or("you");
        println!("  {} - {}", p.display_name_with_kind().bright_cyan(), model.dimmed());
    }
    println!();
    println!(
        "{}",
        "Type to talk. /vote NAME during a vote, /hush to cut someone off, /quit to hang up.".dimmed()
    );
    println!("{}", "─".repeat(70).dimmed());
}

/// Print host events and act as the audio device: each line "plays" for
/// its estimated spoken length, then playback is reported finished.
async fn render_events(
    mut events: broadcast::Receiver<HostEvent>,
    handle: GameHandle,
    roster: Vec<Participant>,
    words_per_second: f32,
    voice_delay: bool,
) {
    let mut playing: HashMap<ParticipantId, JoinHandle<()>> = HashMap::new();
    let mut shown_results_epoch = None;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "display lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            HostEvent::PhaseChanged { to, .. } => print_phase_banner(to),
            HostEvent::PlayAudio(item) => {
                let is_moderator = roster
                    .iter()
                    .any(|p| p.id == item.speaker_id && p.is_moderator());
                let name = if is_moderator {
                    item.speaker_name.bright_magenta().bold()
                } else {
                    item.speaker_name.bright_cyan().bold()
                };
                println!("{} {}", "▶".bright_cyan(), name);
                for line in wrap(&item.text, 66).lines() {
                    println!("  {}", line);
                }
                println!();

                let delay = if voice_delay {
                    estimate_speech_duration(&item.text, words_per_second)
                } else {
                    Duration::ZERO
                };
                let sink = handle.clone();
                let speaker = item.speaker_id;
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sink.playback_finished(speaker).await;
                });
                if let Some(previous) = playing.insert(speaker, task) {
                    previous.abort();
                }
            }
            HostEvent::StopAudio(speaker) => {
                if let Some(task) = playing.remove(&speaker) {
                    task.abort();
                    println!("  {}", "(cut off)".dimmed());
                }
            }
            HostEvent::Snapshot(snapshot) => {
                if tracing::enabled!(tracing::Level::DEBUG) {
                    if let Ok(json) = snapshot.to_json() {
                        tracing::debug!(snapshot = %json, "state");
                    }
                }
                if snapshot.vote_results.is_some() && shown_results_epoch != Some(snapshot.epoch) {
                    shown_results_epoch = Some(snapshot.epoch);
                    print_vote_results(&snapshot, &roster);
                }
            }
            HostEvent::Rejected(reason) => {
                println!("{} {}", "Not now:".yellow(), reason.yellow());
            }
            HostEvent::SystemNotice { .. } => {}
        }
    }
}

fn print_phase_banner(phase: GamePhase) {
    let title = match phase {
        GamePhase::Round1 | GamePhase::Round2 | GamePhase::Round3 => {
            format!("ROUND {}", phase.round_number().unwrap_or(1))
        }
        GamePhase::Elimination1 | GamePhase::Elimination2 => "VOTE: who is the human? (/vote NAME)".to_string(),
        GamePhase::ModeratorIntro => "ON AIR".to_string(),
        GamePhase::Verdict => "VERDICT".to_string(),
        GamePhase::GameOver => "GAME OVER".to_string(),
        GamePhase::Lobby | GamePhase::Connecting => return,
    };
    println!();
    println!("{}", "═".repeat(70).bright_magenta());
    println!("{}", format!("  {}", title).bright_magenta().bold());
    println!("{}", "═".repeat(70).bright_magenta());
    println!();
}

fn print_vote_results(snapshot: &Snapshot, roster: &[Participant]) {
    let Some(results) = &snapshot.vote_results else {
        return;
    };
    let name_of = |id: ParticipantId| {
        roster
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string())
    };
    println!("{}", "The votes are in:".bold());
    for entry in &results.tally {
        println!("  {:<12} {}", name_of(entry.target), "■".repeat(entry.votes).yellow());
    }
    println!(
        "{} {}",
        "Leaving the show:".bold(),
        name_of(results.eliminated).bright_red().bold()
    );
    println!();
}

/// Read the human's lines and slash commands from stdin.
async fn read_commands(handle: GameHandle, roster: Vec<Participant>, quit: oneshot::Sender<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let result = if line == "/quit" {
            let _ = quit.send(());
            return;
        } else if line == "/hush" {
            match handle.speaking(true).await {
                Ok(()) => handle.speaking(false).await,
                Err(e) => Err(e),
            }
        } else if let Some(name) = line.strip_prefix("/vote ") {
            match roster.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim())) {
                Some(target) => handle.human_vote(target.id).await,
                None => {
                    println!("{} {}", "Nobody here is called".yellow(), name.trim().yellow());
                    continue;
                }
            }
        } else if line.is_empty() {
            continue;
        } else {
            handle.human_message(line).await
        };

        if result.is_err() {
            break;
        }
    }
}

/// Simple word wrap.
fn wrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut line_len = 0;

    for word in text.split_whitespace() {
        if line_len > 0 && line_len + word.len() + 1 > width {
            result.push('\n');
            line_len = 0;
        }
        if line_len > 0 {
            result.push(' ');
            line_len += 1;
        }
        result.push_str(word);
        line_len += word.len();
    }

    result
}
