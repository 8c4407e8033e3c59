use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use docsmith_core::types::AdapterType;

/// Lifecycle of a message through the batch processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "PENDING"),
            ProcessingStatus::Processing => write!(f, "PROCESSING"),
            ProcessingStatus::Completed => write!(f, "COMPLETED"),
            ProcessingStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

/// Review state of a proposal. Reversible until the proposal is attached to
/// a submitted changeset batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Ignored,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "pending"),
            ProposalStatus::Approved => write!(f, "approved"),
            ProposalStatus::Ignored => write!(f, "ignored"),
        }
    }
}

impl std::str::FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProposalStatus::Pending),
            "approved" => Ok(ProposalStatus::Approved),
            "ignored" => Ok(ProposalStatus::Ignored),
            other => Err(format!("unknown proposal status: {other}")),
        }
    }
}

/// What a proposal does to its target page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    Insert,
    Update,
    Delete,
    None,
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateType::Insert => write!(f, "INSERT"),
            UpdateType::Update => write!(f, "UPDATE"),
            UpdateType::Delete => write!(f, "DELETE"),
            UpdateType::None => write!(f, "NONE"),
        }
    }
}

impl std::str::FromStr for UpdateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(UpdateType::Insert),
            "UPDATE" => Ok(UpdateType::Update),
            "DELETE" => Ok(UpdateType::Delete),
            "NONE" => Ok(UpdateType::None),
            other => Err(format!("unknown update type: {other}")),
        }
    }
}

/// Lifecycle of a changeset batch. Once it leaves `draft`, every linked
/// proposal is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesetStatus {
    Draft,
    Submitted,
    Merged,
    Closed,
}

impl fmt::Display for ChangesetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangesetStatus::Draft => write!(f, "draft"),
            ChangesetStatus::Submitted => write!(f, "submitted"),
            ChangesetStatus::Merged => write!(f, "merged"),
            ChangesetStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for ChangesetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ChangesetStatus::Draft),
            "submitted" => Ok(ChangesetStatus::Submitted),
            "merged" => Ok(ChangesetStatus::Merged),
            "closed" => Ok(ChangesetStatus::Closed),
            other => Err(format!("unknown changeset status: {other}")),
        }
    }
}

/// What an LLM call (and its cache entry) was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePurpose {
    Index,
    Embeddings,
    Analysis,
    Changegeneration,
    Review,
    General,
}

impl fmt::Display for CachePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePurpose::Index => write!(f, "index"),
            CachePurpose::Embeddings => write!(f, "embeddings"),
            CachePurpose::Analysis => write!(f, "analysis"),
            CachePurpose::Changegeneration => write!(f, "changegeneration"),
            CachePurpose::Review => write!(f, "review"),
            CachePurpose::General => write!(f, "general"),
        }
    }
}

impl std::str::FromStr for CachePurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(CachePurpose::Index),
            "embeddings" => Ok(CachePurpose::Embeddings),
            "analysis" => Ok(CachePurpose::Analysis),
            "changegeneration" => Ok(CachePurpose::Changegeneration),
            "review" => Ok(CachePurpose::Review),
            "general" => Ok(CachePurpose::General),
            other => Err(format!("unknown cache purpose: {other}")),
        }
    }
}

/// Status of one pipeline step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A registered stream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub id: i64,
    pub tenant_id: String,
    pub stream_id: String,
    pub adapter_type: AdapterType,
    pub config_json: serde_json::Value,
    pub enabled: bool,
    /// Scheduler expression; `None` means manual runs only.
    pub schedule: Option<String>,
    pub disabled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// High-water mark of what an adapter has fetched for one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportWatermark {
    pub stream_id: String,
    /// Sub-resource within the stream (filename, channel/topic, chat id).
    /// Empty string for single-resource streams.
    pub resource_id: String,
    pub last_imported_time: DateTime<Utc>,
    pub last_imported_id: Option<String>,
    pub import_complete: bool,
    pub updated_at: DateTime<Utc>,
}

/// High-water mark of what the batch processor has analysed for one stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingWatermark {
    pub stream_id: String,
    pub watermark_time: DateTime<Utc>,
    pub last_processed_batch: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A source message normalised into the unified shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub id: i64,
    pub tenant_id: String,
    pub stream_id: String,
    /// Source-native message id, unique within the stream.
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub channel: Option<String>,
    pub raw_data: String,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub conversation_id: Option<String>,
    pub processing_status: ProcessingStatus,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UnifiedMessage {
    /// Source-specific metadata accessors. Missing keys are `None`.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn topic(&self) -> Option<&str> {
        self.meta_str("topic")
    }

    pub fn reply_to_message_id(&self) -> Option<&str> {
        self.meta_str("reply_to_message_id")
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.meta_str("thread_id")
    }
}

/// Insert shape for a normalised message. The store assigns `id`,
/// `processing_status` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub tenant_id: String,
    pub stream_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
    pub channel: Option<String>,
    pub raw_data: String,
    pub metadata: serde_json::Value,
}

/// Classifier output for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageClassification {
    pub id: i64,
    pub message_id: i64,
    /// Processing-batch hash the message was classified in.
    pub batch_id: String,
    pub category: String,
    pub doc_value_reason: String,
    pub suggested_doc_page: Option<String>,
    pub rag_search_criteria: Vec<String>,
    pub model_used: String,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a classification (id/created_at assigned by the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClassification {
    pub message_id: i64,
    pub batch_id: String,
    pub category: String,
    pub doc_value_reason: String,
    pub suggested_doc_page: Option<String>,
    pub rag_search_criteria: Vec<String>,
    pub model_used: String,
}

/// Retrieved documentation context for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagContext {
    pub id: i64,
    pub conversation_id: String,
    pub retrieved_docs: serde_json::Value,
    pub total_tokens: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRagContext {
    pub conversation_id: String,
    pub retrieved_docs: serde_json::Value,
    pub total_tokens: u32,
}

/// A reviewable documentation-change proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocProposal {
    pub id: i64,
    pub tenant_id: String,
    pub conversation_id: String,
    pub message_ids: Vec<i64>,
    pub page: String,
    pub update_type: UpdateType,
    pub section: Option<String>,
    pub location: Option<serde_json::Value>,
    pub suggested_text: String,
    pub edited_text: Option<String>,
    pub reasoning: String,
    pub confidence: f64,
    pub status: ProposalStatus,
    pub discard_reason: Option<String>,
    pub enrichment: Option<serde_json::Value>,
    pub quality_flags: Vec<String>,
    /// Set when attached to a changeset batch; the proposal is then frozen.
    pub batch_id: Option<String>,
    pub pr_application_status: Option<String>,
    pub pr_application_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub edited_at: Option<DateTime<Utc>>,
    pub edited_by: Option<String>,
}

impl DocProposal {
    pub fn is_frozen(&self) -> bool {
        self.batch_id.is_some()
    }

    /// The text a PR would carry: the reviewer's edit when present.
    pub fn effective_text(&self) -> &str {
        self.edited_text.as_deref().unwrap_or(&self.suggested_text)
    }
}

/// Insert shape for a proposal produced by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProposal {
    pub tenant_id: String,
    pub conversation_id: String,
    pub message_ids: Vec<i64>,
    pub page: String,
    pub update_type: UpdateType,
    pub section: Option<String>,
    pub location: Option<serde_json::Value>,
    pub suggested_text: String,
    pub reasoning: String,
    pub confidence: f64,
    pub status: ProposalStatus,
    pub discard_reason: Option<String>,
    pub enrichment: Option<serde_json::Value>,
    pub quality_flags: Vec<String>,
}

/// A set of approved proposals assembled toward one draft PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesetBatch {
    pub id: i64,
    pub batch_id: String,
    pub tenant_id: String,
    pub status: ChangesetStatus,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
    pub pr_url: Option<String>,
    pub pr_number: Option<i64>,
    pub branch_name: Option<String>,
    pub total_proposals: u32,
    pub affected_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submitted_by: Option<String>,
}

/// One cached LLM exchange, addressed by content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCacheEntry {
    pub hash: String,
    pub purpose: CachePurpose,
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub tokens_used: u32,
    pub timestamp: DateTime<Utc>,
    pub message_id: Option<i64>,
}

/// Cached doc index keyed by `(commit_hash, config_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocIndexCacheEntry {
    pub commit_hash: String,
    pub config_hash: String,
    pub index_data: serde_json::Value,
    pub compact_index_text: String,
    pub generated_at: DateTime<Utc>,
}

/// One pipeline-step execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: i64,
    pub tenant_id: String,
    pub batch_id: String,
    pub step_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_summary: Option<serde_json::Value>,
    pub output_summary: Option<serde_json::Value>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn processing_status_roundtrip() {
        for s in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(ProcessingStatus::from_str(&s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn update_type_rejects_lowercase() {
        assert!(UpdateType::from_str("insert").is_err());
    }

    #[test]
    fn effective_text_prefers_edit() {
        let p = DocProposal {
            id: 1,
            tenant_id: "t".into(),
            conversation_id: "c".into(),
            message_ids: vec![1],
            page: "guide.md".into(),
            update_type: UpdateType::Update,
            section: None,
            location: None,
            suggested_text: "original".into(),
            edited_text: Some("edited".into()),
            reasoning: "r".into(),
            confidence: 0.9,
            status: ProposalStatus::Pending,
            discard_reason: None,
            enrichment: None,
            quality_flags: vec![],
            batch_id: None,
            pr_application_status: None,
            pr_application_error: None,
            created_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
            edited_at: None,
            edited_by: None,
        };
        assert_eq!(p.effective_text(), "edited");
        assert!(!p.is_frozen());
    }
}
