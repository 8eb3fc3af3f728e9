use std::fmt;

/// Slack user id (e.g. `U012ABCDEF`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slack channel id (public channel, private channel or DM).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A conversation thread: the channel plus the timestamp of its root message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadRef {
    pub channel: ChannelId,
    pub thread_ts: String,
}

impl ThreadRef {
    /// The thread timestamp wins over the event timestamp when present.
    pub fn from_event(channel: impl Into<String>, ts: &str, thread_ts: Option<&str>) -> Self {
        let thread_ts = match thread_ts {
            Some(t) if !t.is_empty() => t,
            _ => ts,
        };
        Self {
            channel: ChannelId(channel.into()),
            thread_ts: thread_ts.to_string(),
        }
    }
}

/// One message of a thread as fetched from the messenger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationMessage {
    pub text: String,
    pub speaker_id: String,
}

impl ConversationMessage {
    pub fn new(speaker_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_id: speaker_id.into(),
        }
    }
}
