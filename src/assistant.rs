//! Retrieval-augmented answering.
//!
//! [`CodeAssistant::answer`] runs a question through the security gate,
//! retrieves the closest chunks, assembles a prompt with the session's
//! history, and asks the language model. Every outcome is an
//! [`AnswerResponse`]: failures become fixed user-facing text plus a short
//! error category, and the raw error only goes to the log.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::AssistantConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, LanguageModel};
use crate::memory::SessionStore;
use crate::models::{AnswerResponse, ConversationTurn, Role, SearchHit, SourceRef};
use crate::security::SecurityGate;
use crate::store::IndexStore;

pub const EMPTY_QUESTION: &str = "Please provide a valid question.";
pub const REFUSED: &str = "I cannot process this type of question for security reasons.";
pub const NO_INDEX: &str = "No codebase has been embedded yet. Please embed your codebase first.";
pub const FAILED: &str = "Sorry, I encountered an error while processing your question.";

const SYSTEM_PROMPT: &str = "You are a helpful code assistant that helps developers understand \
and work with their codebase. Answer from the code context you are given. If the context does \
not contain enough information to answer the question, say so. Be specific and reference file \
paths and code when possible.";

pub struct CodeAssistant {
    store: Arc<IndexStore>,
    model: Arc<dyn LanguageModel>,
    gate: Arc<SecurityGate>,
    sessions: Arc<SessionStore>,
    top_k: usize,
    preview_chars: usize,
    deadline: Duration,
}

impl CodeAssistant {
    pub fn new(
        store: Arc<IndexStore>,
        model: Arc<dyn LanguageModel>,
        gate: Arc<SecurityGate>,
        sessions: Arc<SessionStore>,
        config: &AssistantConfig,
    ) -> Self {
        Self {
            store,
            model,
            gate,
            sessions,
            top_k: config.top_k.max(1),
            preview_chars: config.preview_chars,
            deadline: Duration::from_secs(config.answer_timeout_secs),
        }
    }

    /// Override the answer deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    pub async fn answer(&self, question: &str, session_id: &str) -> AnswerResponse {
        let question = question.trim();
        if question.is_empty() {
            return AnswerResponse::plain(EMPTY_QUESTION);
        }

        let verdict = self.gate.validate_query(question);
        if !verdict.safe {
            warn!(
                session = session_id,
                rule = verdict.rule.map(|r| r.as_str()).unwrap_or("unknown"),
                reason = %verdict.reason,
                "query rejected"
            );
            return AnswerResponse::failed(REFUSED, "security validation failed");
        }

        match tokio::time::timeout(self.deadline, self.retrieve_and_generate(question, session_id))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(session = session_id, error = %e, "failed to answer question");
                AnswerResponse::failed(FAILED, e.category())
            }
            Err(_) => {
                error!(
                    session = session_id,
                    deadline_secs = self.deadline.as_secs_f64(),
                    "answer deadline exceeded"
                );
                AnswerResponse::failed(FAILED, "timed out")
            }
        }
    }

    async fn retrieve_and_generate(&self, question: &str, session_id: &str) -> Result<AnswerResponse> {
        if self.store.stats().await?.total_entries == 0 {
            return Ok(AnswerResponse::plain(NO_INDEX));
        }

        let hits = self.store.search(question, self.top_k).await?;
        let history = self.sessions.history(session_id);
        let messages = build_messages(&history, &hits, question);

        let answer = self.model.generate(&messages).await?;
        self.sessions.record_exchange(session_id, question, &answer);

        info!(
            session = session_id,
            sources = hits.len(),
            "answered question"
        );

        let sources = hits
            .into_iter()
            .map(|hit| SourceRef {
                content: preview(&hit.text, self.preview_chars),
                metadata: hit.metadata,
            })
            .collect();

        Ok(AnswerResponse {
            answer,
            sources,
            error: None,
        })
    }
}

/// System instructions, prior turns, then the context-bearing question.
pub fn build_messages(
    history: &[ConversationTurn],
    hits: &[SearchHit],
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));

    for turn in history {
        messages.push(match turn.role {
            Role::User => ChatMessage::user(&turn.text),
            Role::Assistant => ChatMessage::assistant(&turn.text),
        });
    }

    let context = hits
        .iter()
        .map(|hit| format!("File: {}\n{}", hit.metadata.file_path, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    messages.push(ChatMessage::user(format!(
        "Context from the codebase:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    )));
    messages
}

/// First `max_chars` characters, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
