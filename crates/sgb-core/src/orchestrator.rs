//! The completion flow for one inbound chat event.
//!
//! ```text
//! FETCH_QUOTA -> CHECK_QUOTA -+-> blocked: NOTIFY_LIMIT
//!                             +-> allowed: FETCH_HISTORY -> ASSEMBLE_PROMPT
//!                                 -> REQUEST_COMPLETION -> POST_REPLY -> COMMIT_USAGE
//! ```
//!
//! Usage is committed only after the reply is posted. A failed commit leaves
//! the reply visible and the usage unrecorded; it is reported as a
//! `Stage::CommitUsage` error and not reconciled here. Nothing is retried;
//! redelivery belongs to the transport.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    conversation::ConversationAssembler,
    domain::{ThreadRef, UserId},
    errors::{Error, Stage},
    ledger::{Allowance, QuotaLedger},
    ports::{CompletionPort, MessagingPort},
    Result,
};

pub const LIMIT_MESSAGE: &str = "本日の利用制限を超えました。明日以降に再度お試しください。";

/// Posted when the provider returns no reply text.
pub const EMPTY_COMPLETION_MESSAGE: &str = "GPTレスポンスが空です。";

pub const CHARACTER_SETTINGS: &str = "あなたはSlackワークスペースで働く親切なアシスタントです。\
スレッドの流れを踏まえ、簡潔かつ丁寧に日本語で回答してください。\
[GptBot] と表記された発言はあなた自身の過去の発言です。";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Replied { total_tokens: u64 },
    Blocked,
}

pub struct CompletionOrchestrator {
    messenger: Arc<dyn MessagingPort>,
    completion: Arc<dyn CompletionPort>,
    ledger: QuotaLedger,
    assembler: ConversationAssembler,
    character_settings: String,
}

impl CompletionOrchestrator {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        completion: Arc<dyn CompletionPort>,
        ledger: QuotaLedger,
        bot_user_id: UserId,
    ) -> Self {
        Self {
            messenger,
            completion,
            ledger,
            assembler: ConversationAssembler::new(bot_user_id),
            character_settings: CHARACTER_SETTINGS.to_string(),
        }
    }

    pub fn with_character_settings(mut self, settings: impl Into<String>) -> Self {
        self.character_settings = settings.into();
        self
    }

    pub fn bot_user_id(&self) -> &UserId {
        self.assembler.bot_user_id()
    }

    pub fn completion(&self) -> Arc<dyn CompletionPort> {
        self.completion.clone()
    }

    pub fn character_settings(&self) -> &str {
        &self.character_settings
    }

    pub async fn process_messages(&self, thread: &ThreadRef, author: &UserId) -> Result<Outcome> {
        self.process_messages_at(thread, author, Utc::now()).await
    }

    pub async fn process_messages_at(
        &self,
        thread: &ThreadRef,
        author: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let fail = |stage: Stage, e: Error| e.at_stage(stage, author.as_str(), &thread.channel.0);

        let mut record = self
            .ledger
            .ensure_record(author)
            .await
            .map_err(|e| fail(Stage::FetchQuota, e))?;
        record.reset_if_new_day(now);

        if self.ledger.check_allowance(&record) == Allowance::Blocked {
            tracing::info!(
                user = %author,
                channel = %thread.channel,
                tokens_today = record.tokens_used_today,
                limit = self.ledger.daily_limit(),
                "daily token limit exceeded"
            );
            self.messenger
                .post_reply(thread, LIMIT_MESSAGE)
                .await
                .map_err(|e| fail(Stage::NotifyLimit, e))?;
            return Ok(Outcome::Blocked);
        }

        let history = self
            .messenger
            .fetch_thread_history(thread)
            .await
            .map_err(|e| fail(Stage::FetchHistory, e))?;

        let prompt = self.assembler.create_prompt(&history);
        tracing::debug!(
            user = %author,
            channel = %thread.channel,
            thread_ts = %thread.thread_ts,
            messages = history.len(),
            prompt = %prompt,
            "assembled prompt"
        );

        let completion = self
            .completion
            .complete(&self.character_settings, &prompt)
            .await
            .map_err(|e| fail(Stage::RequestCompletion, e))?;

        let reply = if completion.text.trim().is_empty() {
            EMPTY_COMPLETION_MESSAGE
        } else {
            completion.text.as_str()
        };
        self.messenger
            .post_reply(thread, reply)
            .await
            .map_err(|e| fail(Stage::PostReply, e))?;

        let stored = match self
            .ledger
            .commit(author, now, completion.total_tokens)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::error!(
                    user = %author,
                    channel = %thread.channel,
                    tokens = completion.total_tokens,
                    error = %e,
                    "reply posted but usage commit failed"
                );
                return Err(fail(Stage::CommitUsage, e));
            }
        };

        tracing::info!(
            user = %author,
            channel = %thread.channel,
            tokens = completion.total_tokens,
            tokens_today = stored.tokens_used_today,
            interactions = stored.total_interactions,
            "reply posted"
        );

        Ok(Outcome::Replied {
            total_tokens: completion.total_tokens,
        })
    }
}
