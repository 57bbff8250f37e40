//! JSON shapes of the assistants REST API and their mapping onto core types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::model::{
    AssistantConfig, AssistantSpec, BatchFileCounts, BatchStatus, ContentPart, ConversationHandle,
    DocumentHandle, IndexBatch, IndexHandle, Message, Role, Run, RunError, RunStatus,
};

use super::capability::ApiVersion;

/// Metadata key recording which index an assistant was bound to.
pub(crate) const INDEX_METADATA_KEY: &str = "docchat_index_id";

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

/// The `error.message` of an API error body, if the body has one.
pub(crate) fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|message| !message.trim().is_empty())
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileObject {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub created_at: i64,
}

impl FileObject {
    pub fn into_handle(self, fallback_name: &str) -> DocumentHandle {
        DocumentHandle {
            display_name: if self.filename.is_empty() {
                fallback_name.to_string()
            } else {
                self.filename
            },
            id: self.id,
            upload_time: timestamp(self.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct VectorStoreObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl VectorStoreObject {
    pub fn into_handle(self, requested_name: &str) -> IndexHandle {
        let name = self.name.unwrap_or_else(|| requested_name.to_string());
        IndexHandle::new(self.id, name)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileCounts {
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileBatchObject {
    pub id: String,
    pub vector_store_id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub file_counts: FileCounts,
}

impl From<FileBatchObject> for IndexBatch {
    fn from(batch: FileBatchObject) -> Self {
        let counts = batch.file_counts;
        IndexBatch {
            id: batch.id,
            index_id: batch.vector_store_id,
            status: batch.status,
            file_counts: BatchFileCounts {
                in_progress: counts.in_progress,
                completed: counts.completed,
                failed: counts.failed,
                cancelled: counts.cancelled,
                total: counts.total,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssistantObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tool_resources: Option<Value>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

impl From<AssistantObject> for AssistantConfig {
    fn from(assistant: AssistantObject) -> Self {
        let from_tools = assistant
            .tool_resources
            .as_ref()
            .and_then(|resources| resources.pointer("/file_search/vector_store_ids/0"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let from_metadata = assistant
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get(INDEX_METADATA_KEY))
            .filter(|id| !id.is_empty())
            .cloned();
        AssistantConfig {
            id: assistant.id,
            name: assistant.name.unwrap_or_default(),
            model: assistant.model,
            instructions: assistant.instructions.unwrap_or_default(),
            bound_index_id: from_tools.or(from_metadata),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ThreadObject {
    pub id: String,
    #[serde(default)]
    pub created_at: i64,
}

impl From<ThreadObject> for ConversationHandle {
    fn from(thread: ThreadObject) -> Self {
        ConversationHandle {
            id: thread.id,
            created_at: timestamp(thread.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextContent {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageObject {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentObject>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl From<MessageObject> for Message {
    fn from(message: MessageObject) -> Self {
        let content = message
            .content
            .into_iter()
            .map(|part| match part.text {
                Some(text) if part.kind == "text" => ContentPart::Text(text.value),
                _ => ContentPart::Other(part.kind),
            })
            .collect();
        Message {
            id: message.id,
            role: message.role,
            content,
            created_at: timestamp(message.created_at),
            run_id: message.run_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageList {
    pub data: Vec<MessageObject>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub last_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncompleteDetails {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunObject {
    pub id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunError>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
}

impl From<RunObject> for Run {
    fn from(run: RunObject) -> Self {
        let incomplete = run
            .incomplete_details
            .and_then(|details| details.reason)
            .map(|reason| RunError {
                code: Some("incomplete".to_string()),
                message: format!("run ended incomplete: {reason}"),
            });
        Run {
            id: run.id,
            conversation_id: run.thread_id,
            assistant_id: run.assistant_id,
            status: run.status,
            last_error: run.last_error.or(incomplete),
        }
    }
}

fn index_metadata(index: Option<&IndexHandle>) -> Value {
    json!({ INDEX_METADATA_KEY: index.map(|index| index.id.as_str()).unwrap_or_default() })
}

/// Tool configuration that points an assistant at `index`.
fn tool_fields(version: ApiVersion, index: Option<&IndexHandle>) -> serde_json::Map<String, Value> {
    let mut fields = serde_json::Map::new();
    match version {
        ApiVersion::V2 => {
            fields.insert("tools".to_string(), json!([{ "type": "file_search" }]));
            if let Some(index) = index {
                fields.insert(
                    "tool_resources".to_string(),
                    json!({ "file_search": { "vector_store_ids": [index.id] } }),
                );
            }
        }
        ApiVersion::V1 => {
            fields.insert("tools".to_string(), json!([{ "type": "retrieval" }]));
            let file_ids: Vec<&String> = index
                .map(|index| index.member_document_ids.iter().collect())
                .unwrap_or_default();
            fields.insert("file_ids".to_string(), json!(file_ids));
        }
    }
    fields.insert("metadata".to_string(), index_metadata(index));
    fields
}

pub(crate) fn create_assistant_body(
    version: ApiVersion,
    spec: &AssistantSpec,
    index: Option<&IndexHandle>,
) -> Value {
    let mut body = tool_fields(version, index);
    body.insert("name".to_string(), json!(spec.name));
    body.insert("model".to_string(), json!(spec.model));
    body.insert("instructions".to_string(), json!(spec.instructions));
    Value::Object(body)
}

pub(crate) fn update_assistant_body(version: ApiVersion, index: &IndexHandle) -> Value {
    Value::Object(tool_fields(version, Some(index)))
}
