//! Prompt assembly for collaborator requests.

use crate::config::{Config, render};
use crate::conversation::ConversationLog;
use crate::event::PromptContext;
use crate::participant::{Participant, ParticipantId};
use crate::registry::ConnectionRegistry;

pub(crate) struct PromptBuilder<'a> {
    pub config: &'a Config,
    pub registry: &'a ConnectionRegistry,
    pub log: &'a ConversationLog,
    pub facilitator: Option<ParticipantId>,
}

impl PromptBuilder<'_> {
    /// System prompt for `speaker`, with the facilitator addendum if they
    /// hold that role.
    pub fn system(&self, speaker: &Participant) -> String {
        let theme = self.config.game.theme.as_str();
        if speaker.is_moderator() {
            return render(
                &self.config.prompts.moderator_persona,
                &[("name", &speaker.name), ("theme", theme)],
            );
        }

        let others = self
            .registry
            .active_roster()
            .into_iter()
            .filter(|(id, _)| *id != speaker.id)
            .map(|(_, name)| name)
            .collect::<Vec<_>>()
            .join(", ");
        let persona = speaker.persona.as_deref().unwrap_or("");

        let mut system = render(
            &self.config.prompts.ai_persona,
            &[
                ("name", &speaker.name),
                ("theme", theme),
                ("others", &others),
                ("persona", persona),
            ],
        );
        if self.facilitator == Some(speaker.id) {
            system.push_str("\n\n");
            system.push_str(&self.config.prompts.facilitator);
        }
        system
    }

    /// Full request context: system prompt, conversation copy, instruction.
    pub fn build(&self, speaker: &Participant, instruction: String, full_transcript: bool) -> PromptContext {
        let transcript = if full_transcript {
            self.log.transcript().to_vec()
        } else {
            self.log.recent(self.config.game.conversation_window).to_vec()
        };
        PromptContext {
            system: self.system(speaker),
            transcript,
            instruction,
            max_tokens: self.config.game.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use std::time::Duration;

    #[test]
    fn test_ai_system_prompt_lists_other_active_players() {
        let config = default_config();
        let mut registry = ConnectionRegistry::new(config.participants("m")).unwrap();
        for p in registry.participants().to_vec() {
            registry.connect(p.id).unwrap();
        }
        registry.eliminate(ParticipantId(4)).unwrap();
        let log = ConversationLog::new();
        let builder = PromptBuilder {
            config: &config,
            registry: &registry,
            log: &log,
            facilitator: Some(ParticipantId(1)),
        };
        let ada = registry.get(ParticipantId(1)).unwrap();
        let system = builder.system(ada);
        assert!(system.contains("You are Ada"));
        assert!(system.contains("Riley, Bram, Cleo"));
        assert!(!system.contains("Dex"));
        assert!(system.contains("facilitator"));

        let bram = registry.get(ParticipantId(2)).unwrap();
        assert!(!builder.system(bram).contains("facilitator"));
    }

    #[test]
    fn test_build_uses_recent_window() {
        let mut config = default_config();
        config.game.conversation_window = 2;
        let registry = ConnectionRegistry::new(config.participants("m")).unwrap();
        let mut log = ConversationLog::new();
        for i in 0..5 {
            log.append(ParticipantId(1), "Ada", format!("line {}", i), Duration::from_secs(i));
        }
        let builder = PromptBuilder {
            config: &config,
            registry: &registry,
            log: &log,
            facilitator: None,
        };
        let ada = registry.get(ParticipantId(1)).unwrap();
        let recent = builder.build(ada, "go".to_string(), false);
        assert_eq!(recent.transcript.len(), 2);
        assert_eq!(recent.transcript[0].text, "line 3");
        let full = builder.build(ada, "go".to_string(), true);
        assert_eq!(full.transcript.len(), 5);
    }
}
