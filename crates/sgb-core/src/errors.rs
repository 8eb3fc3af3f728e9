use std::fmt;

/// Core error type.
///
/// Adapter crates map their transport errors into `External` so the
/// orchestrator can attach stage context uniformly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    /// A collaborator call failed inside the completion flow.
    #[error("{stage} failed for user {user} in channel {channel}: {source}")]
    Stage {
        stage: Stage,
        user: String,
        channel: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap a collaborator failure with the flow step and event it happened in.
    pub fn at_stage(self, stage: Stage, user: &str, channel: &str) -> Error {
        Error::Stage {
            stage,
            user: user.to_string(),
            channel: channel.to_string(),
            source: Box::new(self),
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Steps of the completion flow that talk to a collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    FetchQuota,
    NotifyLimit,
    FetchHistory,
    RequestCompletion,
    PostReply,
    /// The reply is already visible; usage was not recorded.
    CommitUsage,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::FetchQuota => "fetch_quota",
            Stage::NotifyLimit => "notify_limit",
            Stage::FetchHistory => "fetch_history",
            Stage::RequestCompletion => "request_completion",
            Stage::PostReply => "post_reply",
            Stage::CommitUsage => "commit_usage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
