//! Core data models used throughout the assistant.
//!
//! These types represent the files, chunks, index hits, conversation turns,
//! and security verdicts that flow through the ingestion and answer
//! pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An admissible file found by the scanner, before its content is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Lower-cased extension including the leading dot, e.g. `".rs"`.
    pub extension: String,
    pub modified_at: DateTime<Utc>,
}

/// One version of a source file: descriptor plus hashed, decoded content.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
    pub extension: String,
    pub modified_at: DateTime<Utc>,
    /// SHA-256 of the raw bytes, lower-case hex.
    pub content_hash: String,
    pub content: String,
}

impl SourceFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// A chunk of a file's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// SHA-256 of `file_hash:chunk_index`, lower-case hex.
    pub id: String,
    pub file_hash: String,
    pub chunk_index: i64,
    pub text: String,
    /// Character offset of the untrimmed range in the source.
    pub start: usize,
    pub end: usize,
}

/// Metadata stored alongside every index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub file_name: String,
    pub file_extension: String,
    pub file_size: u64,
    pub file_hash: String,
    pub last_modified: i64,
    pub chunk_index: i64,
}

/// A ranked hit returned from [`IndexStore::search`](crate::store::IndexStore::search).
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity in `[-1, 1]`; higher is more similar.
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Identifier of the security rule that produced a negative verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityRule {
    QueryTooLong,
    CodeExecution,
    ProcessModule,
    FileIo,
    DestructiveVerb,
    SystemCall,
    DangerousImport,
    UnboundedLoop,
    SuspiciousKeyword,
    PathTraversal,
    OutsideAllowedDirs,
    DeniedExtension,
    BinaryContent,
    SecretAssignment,
    PrivateKey,
}

impl SecurityRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityRule::QueryTooLong => "query_too_long",
            SecurityRule::CodeExecution => "code_execution",
            SecurityRule::ProcessModule => "process_module",
            SecurityRule::FileIo => "file_io",
            SecurityRule::DestructiveVerb => "destructive_verb",
            SecurityRule::SystemCall => "system_call",
            SecurityRule::DangerousImport => "dangerous_import",
            SecurityRule::UnboundedLoop => "unbounded_loop",
            SecurityRule::SuspiciousKeyword => "suspicious_keyword",
            SecurityRule::PathTraversal => "path_traversal",
            SecurityRule::OutsideAllowedDirs => "outside_allowed_dirs",
            SecurityRule::DeniedExtension => "denied_extension",
            SecurityRule::BinaryContent => "binary_content",
            SecurityRule::SecretAssignment => "secret_assignment",
            SecurityRule::PrivateKey => "private_key",
        }
    }
}

/// Outcome of a single security check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityVerdict {
    pub safe: bool,
    pub reason: String,
    pub rule: Option<SecurityRule>,
}

impl SecurityVerdict {
    pub fn safe(reason: impl Into<String>) -> Self {
        Self {
            safe: true,
            reason: reason.into(),
            rule: None,
        }
    }

    pub fn unsafe_because(rule: SecurityRule, reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: reason.into(),
            rule: Some(rule),
        }
    }
}

/// A retrieved chunk as handed back to the caller of an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// The answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub error: Option<String>,
}

impl AnswerResponse {
    pub fn plain(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
            error: None,
        }
    }

    pub fn failed(answer: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
            error: Some(error.into()),
        }
    }
}
