//! AI collaborators: anything that can turn a prompt into a line of dialogue.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::arbiter::first_mentioned;
use crate::error::GameError;
use crate::event::PromptContext;
use crate::participant::{Participant, ParticipantId};

/// Produces utterances and votes on behalf of AI participants.
#[async_trait]
pub trait Responder: Send + Sync {
    /// One spoken line for `speaker`. Implementations return sanitized text.
    async fn utterance(&self, speaker: &Participant, prompt: &PromptContext) -> Result<String, GameError>;

    /// Pick one of `candidates`. `None` means the reply named nobody usable.
    async fn vote(
        &self,
        voter: &Participant,
        prompt: &PromptContext,
        candidates: &[(ParticipantId, String)],
    ) -> Result<Option<ParticipantId>, GameError> {
        let reply = self.utterance(voter, prompt).await?;
        Ok(parse_vote(&reply, candidates))
    }

    /// Out-of-band notice for a participant's next prompt.
    async fn notify(&self, _participant: ParticipantId, _text: &str) {}
}

/// Chat-completion backed responder.
pub struct OpenAiResponder {
    client: Client<OpenAIConfig>,
    default_model: String,
    max_retries: u32,
    notes: Mutex<HashMap<ParticipantId, Vec<String>>>,
}

impl OpenAiResponder {
    pub fn new(api_base: &str, api_key: &str, default_model: impl Into<String>) -> Result<Self, GameError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GameError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            default_model: default_model.into(),
            max_retries: 3,
            notes: Mutex::new(HashMap::new()),
        })
    }

    /// Build the chat history for one request. The speaker's own lines are
    /// assistant turns; everyone else's are quoted user turns.
    fn messages(&self, speaker: &Participant, prompt: &PromptContext) -> Vec<ChatCompletionRequestMessage> {
        let mut system = prompt.system.clone();
        let notes = self
            .notes
            .lock()
            .map(|mut notes| notes.remove(&speaker.id).unwrap_or_default())
            .unwrap_or_default();
        if !notes.is_empty() {
            system.push_str("\n\nSHOW NOTES:\n");
            system.push_str(&notes.join("\n"));
        }

        let mut messages = vec![ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessage {
                content: system.into(),
                name: None,
            },
        )];

        for entry in &prompt.transcript {
            if entry.speaker_id == speaker.id {
                messages.push(ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage {
                        content: Some(entry.text.clone().into()),
                        name: None,
                        tool_calls: None,
                        refusal: None,
                        audio: None,
                        function_call: None,
                    },
                ));
            } else {
                messages.push(ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage {
                        content: format!("[{} said]: {}", entry.speaker_name, entry.text).into(),
                        name: None,
                    },
                ));
            }
        }

        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: format!("[Host direction]: {}", prompt.instruction).into(),
                name: None,
            },
        ));
        messages
    }

    /// One completion, retried with exponential backoff.
    async fn complete(&self, speaker: &Participant, prompt: &PromptContext) -> Result<String, GameError> {
        let model = speaker.model.as_deref().unwrap_or(&self.default_model);
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .max_completion_tokens(prompt.max_tokens)
            .messages(self.messages(speaker, prompt))
            .build()?;

        let mut last_error = None;
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // 2s, 4s, ...
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }

            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    return Ok(response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default());
                }
                Err(e) => {
                    warn!(speaker = %speaker.name, attempt = attempt + 1, error = %e, "completion failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .map(GameError::from)
            .unwrap_or_else(|| GameError::ConfigError("Unknown API error after retries".to_string())))
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn utterance(&self, speaker: &Participant, prompt: &PromptContext) -> Result<String, GameError> {
        let max_empty_retries = 2;
        for attempt in 0..max_empty_retries {
            let raw = self.complete(speaker, prompt).await?;
            let line = sanitize_response(&raw, &speaker.name);
            if !line.is_empty() {
                return Ok(line);
            }
            debug!(speaker = %speaker.name, attempt = attempt + 1, "empty completion");
        }
        Err(GameError::EmptyResponse(speaker.name.clone()))
    }

    async fn notify(&self, participant: ParticipantId, text: &str) {
        if let Ok(mut notes) = self.notes.lock() {
            notes.entry(participant).or_default().push(text.to_string());
        }
    }
}

/// Offline responder that cycles through canned lines. Votes go to the
/// first candidate unless a script entry names someone.
pub struct ScriptedResponder {
    lines: Vec<String>,
    cursor: Mutex<usize>,
}

impl ScriptedResponder {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            cursor: Mutex::new(0),
        }
    }

    fn next_line(&self) -> String {
        let Ok(mut cursor) = self.cursor.lock() else {
            return String::new();
        };
        if self.lines.is_empty() {
            return String::new();
        }
        let line = self.lines[*cursor % self.lines.len()].clone();
        *cursor += 1;
        line
    }
}

impl Default for ScriptedResponder {
    fn default() -> Self {
        Self::new(
            [
                "Honestly, I just process whatever comes in. Next question.",
                "That's a strange thing to say for an AI, isn't it?",
                "I run on good vibes and a very large matrix.",
                "Somebody here is trying too hard to sound synthetic.",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn utterance(&self, speaker: &Participant, _prompt: &PromptContext) -> Result<String, GameError> {
        let line = sanitize_response(&self.next_line(), &speaker.name);
        if line.is_empty() {
            return Err(GameError::EmptyResponse(speaker.name.clone()));
        }
        Ok(line)
    }

    async fn vote(
        &self,
        _voter: &Participant,
        _prompt: &PromptContext,
        candidates: &[(ParticipantId, String)],
    ) -> Result<Option<ParticipantId>, GameError> {
        let line = self.next_line();
        Ok(parse_vote(&line, candidates).or_else(|| candidates.first().map(|(id, _)| *id)))
    }
}

/// The candidate a vote reply names first.
pub fn parse_vote(reply: &str, candidates: &[(ParticipantId, String)]) -> Option<ParticipantId> {
    first_mentioned(reply, candidates)
}

static REASONING_TAGS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(thinking|think|reflection|reflect|internal|reasoning|thought|scratch|scratchpad|plan|analysis|analyze|consider|pondering|deliberation)\b[^>]*>.*?</(thinking|think|reflection|reflect|internal|reasoning|thought|scratch|scratchpad|plan|analysis|analyze|consider|pondering|deliberation)>",
    )
    .ok()
});
static STRAY_TAGS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"</?\w+[^>]*>").ok());
static STAGE_DIRECTIONS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

fn replace(re: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match re.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Make a model reply fit to be spoken aloud by `speaker`.
///
/// Strips reasoning blocks and stray markup, bracketed stage directions,
/// markdown emphasis, a leading "Name:" self-label and wrapping quotes.
pub fn sanitize_response(response: &str, speaker: &str) -> String {
    let mut text = replace(&REASONING_TAGS, response, "");
    text = replace(&STRAY_TAGS, &text, "");
    text = replace(&STAGE_DIRECTIONS, &text, "");
    text = text.replace(['*', '_', '#'], "");
    text = replace(&WHITESPACE, &text, " ");

    let mut line = text.trim();
    if let Some((label, rest)) = line.split_once(':') {
        if label.trim().eq_ignore_ascii_case(speaker) {
            line = rest.trim();
        }
    }
    line.trim_matches('"').trim().to_string()
}
