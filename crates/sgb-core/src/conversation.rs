//! Turns a thread history into the completion prompt body.

use crate::domain::{ConversationMessage, UserId};

/// Only the most recent messages of a thread are sent to the model.
pub const MAX_HISTORY_MESSAGES: usize = 20;

/// Replaces the bot's user id so its own turns are recognizable in the transcript.
pub const BOT_MARKER: &str = "[GptBot]";

pub const PROMPT_PREAMBLE: &str =
    "以下はSlackスレッドの履歴を含んだGPTプロンプトです。下記を踏まえて答えてください";

/// One transcript line before formatting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowEntry {
    pub speaker: String,
    pub message: String,
}

/// Keep the last `max` messages, oldest first.
pub fn limit_messages(messages: &[ConversationMessage], max: usize) -> &[ConversationMessage] {
    if messages.len() > max {
        &messages[messages.len() - max..]
    } else {
        messages
    }
}

pub fn optimize_message(text: &str, bot_user_id: &str) -> String {
    let text = if bot_user_id.is_empty() {
        text.to_string()
    } else {
        text.replace(bot_user_id, BOT_MARKER)
    };
    text.trim()
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

pub fn conversation_flow(messages: &[ConversationMessage], bot_user_id: &str) -> Vec<FlowEntry> {
    messages
        .iter()
        .map(|m| FlowEntry {
            speaker: m.speaker_id.clone(),
            message: optimize_message(&m.text, bot_user_id),
        })
        .collect()
}

/// Builds prompts for one bot identity.
#[derive(Clone, Debug)]
pub struct ConversationAssembler {
    bot_user_id: UserId,
    max_messages: usize,
}

impl ConversationAssembler {
    pub fn new(bot_user_id: UserId) -> Self {
        Self {
            bot_user_id,
            max_messages: MAX_HISTORY_MESSAGES,
        }
    }

    pub fn bot_user_id(&self) -> &UserId {
        &self.bot_user_id
    }

    /// Preamble line, then `<speaker>, message: <text>` per retained message.
    pub fn create_prompt(&self, messages: &[ConversationMessage]) -> String {
        let window = limit_messages(messages, self.max_messages);

        let mut out = String::with_capacity(PROMPT_PREAMBLE.len() + window.len() * 64);
        out.push_str(PROMPT_PREAMBLE);
        out.push('\n');
        for entry in conversation_flow(window, self.bot_user_id.as_str()) {
            out.push_str(&format!("{}, message: {}\n", entry.speaker, entry.message));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "botUserID";

    fn history(n: usize) -> Vec<ConversationMessage> {
        (0..n)
            .map(|i| ConversationMessage::new(format!("U{i}"), format!("message {i}")))
            .collect()
    }

    fn assembler() -> ConversationAssembler {
        ConversationAssembler::new(UserId(BOT.to_string()))
    }

    #[test]
    fn optimize_replaces_bot_mention() {
        assert_eq!(optimize_message("Hello <@botUserID>!", BOT), "Hello <@[GptBot]>!");
        assert_eq!(optimize_message("Hello world!", BOT), "Hello world!");
    }

    #[test]
    fn optimize_trims_and_flattens_newlines() {
        assert_eq!(optimize_message("  Hello <@botUserID>!  ", BOT), "Hello <@[GptBot]>!");
        assert_eq!(optimize_message("Hello\n<@botUserID>!", BOT), "Hello <@[GptBot]>!");
        assert_eq!(optimize_message("a\r\nb\rc", BOT), "a b c");
    }

    #[test]
    fn optimize_is_idempotent_on_clean_text() {
        for text in ["plain text", "  padded  ", "<@[GptBot]> already marked"] {
            let once = optimize_message(text, BOT);
            assert_eq!(optimize_message(&once, BOT), once);
        }
    }

    #[test]
    fn empty_bot_id_does_not_inject_markers() {
        assert_eq!(optimize_message("hi", ""), "hi");
    }

    #[test]
    fn flow_preserves_speakers_and_order() {
        let msgs = vec![
            ConversationMessage::new("U12345", "Hello <@botUserID>!"),
            ConversationMessage::new("U67890", "How are you?"),
        ];
        let flow = conversation_flow(&msgs, BOT);
        assert_eq!(
            flow,
            vec![
                FlowEntry {
                    speaker: "U12345".to_string(),
                    message: "Hello <@[GptBot]>!".to_string()
                },
                FlowEntry {
                    speaker: "U67890".to_string(),
                    message: "How are you?".to_string()
                },
            ]
        );
        assert!(conversation_flow(&[], BOT).is_empty());
    }

    #[test]
    fn long_history_keeps_last_twenty_in_order() {
        let prompt = assembler().create_prompt(&history(25));
        let lines: Vec<&str> = prompt.lines().collect();

        assert_eq!(lines[0], PROMPT_PREAMBLE);
        assert_eq!(lines.len(), 1 + MAX_HISTORY_MESSAGES);
        assert_eq!(lines[1], "U5, message: message 5");
        assert_eq!(lines[20], "U24, message: message 24");
        assert!(!prompt.contains("U4, message"));
    }

    #[test]
    fn short_history_is_kept_whole() {
        let prompt = assembler().create_prompt(&history(3));
        assert_eq!(
            prompt,
            format!(
                "{PROMPT_PREAMBLE}\nU0, message: message 0\nU1, message: message 1\nU2, message: message 2\n"
            )
        );
        assert_eq!(limit_messages(&history(20), MAX_HISTORY_MESSAGES).len(), 20);
    }
}
