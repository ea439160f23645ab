//! Application facade.
//!
//! [`App`] owns one instance of every component and exposes the
//! operations the CLI and the HTTP server call. Construct it once with
//! [`App::from_config`], or with [`App::new`] to inject a prepared store
//! and language model.

use anyhow::Context;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assistant::CodeAssistant;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::{CoreError, Result};
use crate::llm::{create_language_model, LanguageModel};
use crate::memory::SessionStore;
use crate::models::{AnswerResponse, ConversationTurn, SearchHit};
use crate::scanner;
use crate::security::SecurityGate;
use crate::store::{FileUpsert, IndexStats, IndexStore};

/// Session used when a caller does not name one.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub message: String,
    pub files_processed: usize,
    /// Chunks written to the index.
    pub documents_created: usize,
    pub files_unchanged: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_removed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub index_stats: IndexStats,
    pub conversation_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: String,
    pub version: String,
    pub index_ready: bool,
    pub model_configured: bool,
}

pub struct App {
    config: Config,
    gate: Arc<SecurityGate>,
    store: Arc<IndexStore>,
    sessions: Arc<SessionStore>,
    assistant: CodeAssistant,
}

impl App {
    /// Build every component from configuration.
    ///
    /// Fails when a provider cannot be constructed (for example a missing
    /// `OPENAI_API_KEY`) or the index cannot be opened.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_language_model(&config.llm)?;
        let store = IndexStore::open(
            &config.index.path,
            &config.index.collection,
            embedder,
            config.embedding.batch_size,
            &config.chunking,
        )
        .await
        .with_context(|| format!("Failed to open index at {}", config.index.path.display()))?;

        Ok(Self::new(config, Arc::new(store), model))
    }

    pub fn new(config: &Config, store: Arc<IndexStore>, model: Arc<dyn LanguageModel>) -> Self {
        let gate = Arc::new(SecurityGate::new(&config.security));
        let sessions = Arc::new(SessionStore::new(
            config.assistant.history_cap,
            Duration::from_secs(config.assistant.session_ttl_secs),
        ));
        let assistant = CodeAssistant::new(
            store.clone(),
            model,
            gate.clone(),
            sessions.clone(),
            &config.assistant,
        );

        Self {
            config: config.clone(),
            gate,
            store,
            sessions,
            assistant,
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    /// Scan, validate, chunk, embed, and index a directory.
    ///
    /// Files rejected by the gate or unreadable as text are skipped, and
    /// files whose embedding fails are counted as failed; neither stops
    /// the run. Cancellation is checked between files.
    pub async fn ingest(
        &self,
        dir: &Path,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let root = std::path::absolute(dir)?;
        let verdict = self.gate.validate_path(&root);
        if !verdict.safe {
            warn!(
                path = %root.display(),
                rule = verdict.rule.map(|r| r.as_str()).unwrap_or("unknown"),
                "ingest root rejected"
            );
            return Err(CoreError::InvalidArgument(verdict.reason));
        }

        let entries = scanner::scan(&root, recursive, &self.config.scanner)?;
        let mut report = IngestReport::default();

        let admitted: Vec<_> = entries
            .into_iter()
            .filter(|entry| {
                let verdict = self.gate.validate_path(&entry.path);
                if !verdict.safe {
                    debug!(path = %entry.path.display(), reason = %verdict.reason, "path rejected");
                    report.files_skipped += 1;
                }
                verdict.safe
            })
            .collect();

        if recursive {
            let live: HashSet<String> = admitted
                .iter()
                .map(|e| e.path.to_string_lossy().to_string())
                .collect();
            report.files_removed = self.store.retain_paths_under(&root, &live).await?;
        }

        info!(root = %root.display(), files = admitted.len(), "ingesting");

        for entry in &admitted {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let source = match scanner::read_source(entry) {
                Ok(source) => source,
                Err(e) => {
                    debug!(path = %entry.path.display(), error = %e, "unreadable file");
                    report.files_skipped += 1;
                    self.store.remove_path(&entry.path).await?;
                    continue;
                }
            };

            let verdict = self
                .gate
                .validate_content(source.content.as_bytes(), &source.path);
            if !verdict.safe {
                report.files_skipped += 1;
                self.store.remove_path(&source.path).await?;
                continue;
            }

            match self.store.upsert_file(&source).await {
                Ok(FileUpsert::Unchanged) => {
                    report.files_processed += 1;
                    report.files_unchanged += 1;
                }
                Ok(FileUpsert::Written { chunks }) => {
                    report.files_processed += 1;
                    report.documents_created += chunks;
                }
                Err(e @ CoreError::StoreUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(path = %source.path.display(), error = %e, "failed to index file");
                    report.files_failed += 1;
                }
            }
        }

        report.success = report.files_processed > 0 && !report.cancelled;
        report.message = if report.cancelled {
            format!("Ingest cancelled after {} files", report.files_processed)
        } else if report.files_processed == 0 && report.files_failed == 0 {
            "Nothing to embed: no supported files found".to_string()
        } else if report.files_failed > 0 {
            format!(
                "Embedded {} files; {} failed",
                report.files_processed, report.files_failed
            )
        } else {
            "Codebase embedded successfully".to_string()
        };

        info!(
            processed = report.files_processed,
            chunks = report.documents_created,
            unchanged = report.files_unchanged,
            skipped = report.files_skipped,
            failed = report.files_failed,
            removed = report.files_removed,
            cancelled = report.cancelled,
            "ingest finished"
        );
        Ok(report)
    }

    /// Answer a question, rate-limited per session.
    pub async fn ask(&self, question: &str, session_id: &str) -> Result<AnswerResponse> {
        let status = self.gate.check_rate_limit(session_id);
        if !status.allowed {
            warn!(session = session_id, count = status.count_in_window, "rate limit exceeded");
            return Err(CoreError::RateLimited(status.count_in_window));
        }
        Ok(self.assistant.answer(question, session_id).await)
    }

    /// Raw similarity search. The query passes the same gate as questions.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let verdict = self.gate.validate_query(query);
        if !verdict.safe {
            return Err(CoreError::InvalidArgument(verdict.reason));
        }
        self.store.search(query, k).await
    }

    pub async fn system_info(&self, session_id: &str) -> Result<SystemInfo> {
        let model = self.assistant.model();
        Ok(SystemInfo {
            model_name: model.model_name().to_string(),
            temperature: model.temperature(),
            max_tokens: model.max_tokens(),
            index_stats: self.store.stats().await?,
            conversation_length: self.sessions.len(session_id),
        })
    }

    pub fn get_history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.sessions.history(session_id)
    }

    pub fn clear_history(&self, session_id: &str) -> bool {
        info!(session = session_id, "cleared conversation history");
        self.sessions.clear(session_id)
    }

    pub async fn clear_index(&self) -> Result<bool> {
        self.store.clear().await
    }

    pub async fn health_check(&self) -> Health {
        let (status, index_ready) = match self.store.stats().await {
            Ok(stats) => ("healthy", stats.total_entries > 0),
            Err(e) => {
                warn!(error = %e, "index unavailable during health check");
                ("degraded", false)
            }
        };
        Health {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            index_ready,
            model_configured: self.assistant.model().is_configured(),
        }
    }
}
