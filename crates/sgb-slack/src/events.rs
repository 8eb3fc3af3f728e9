//! Slack Events API payloads and the decision of which events reach the bot.

use serde::Deserialize;

use sgb_core::domain::{ThreadRef, UserId};

/// Outer Events API envelope.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        event_id: Option<String>,
        event: InnerEvent,
    },
    #[serde(other)]
    Other,
}

/// The fields of `message` / `app_mention` events the bot looks at.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InnerEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventAction {
    Process { thread: ThreadRef, author: UserId },
    Ignore(&'static str),
}

/// Decide whether an inner event should run the completion flow.
///
/// Mentions are always answered. Plain messages are answered in direct
/// messages and inside threads, except bot-authored ones and threaded
/// messages that mention the bot (the paired `app_mention` answers those).
///
/// The Slack app must subscribe to the `app_mention` bot event alongside
/// `message.channels`/`message.im`; without it, mentions posted inside a
/// thread are never answered.
pub fn classify(event: &InnerEvent, bot_user_id: &UserId) -> EventAction {
    let author = match event.user.as_deref() {
        Some(u) if !u.is_empty() => UserId(u.to_string()),
        _ => return EventAction::Ignore("event without author"),
    };
    let thread = || ThreadRef::from_event(&event.channel, &event.ts, event.thread_ts.as_deref());

    match event.kind.as_str() {
        "app_mention" => EventAction::Process {
            thread: thread(),
            author,
        },
        "message" => {
            if event.bot_id.as_deref().is_some_and(|b| !b.is_empty()) {
                return EventAction::Ignore("bot message");
            }
            if event.channel_type.as_deref() == Some("im") {
                return EventAction::Process {
                    thread: thread(),
                    author,
                };
            }
            if event.thread_ts.as_deref().is_some_and(|t| !t.is_empty()) {
                if mentions(&event.text, bot_user_id) {
                    return EventAction::Ignore("threaded mention handled as app_mention");
                }
                return EventAction::Process {
                    thread: thread(),
                    author,
                };
            }
            EventAction::Ignore("unsupported message event")
        }
        _ => EventAction::Ignore("unsupported event"),
    }
}

fn mentions(text: &str, bot_user_id: &UserId) -> bool {
    !bot_user_id.0.is_empty() && text.contains(&format!("<@{}>", bot_user_id.0))
}
