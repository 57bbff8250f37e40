pub mod capability;
mod wire;

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::core::error::ServiceError;
use crate::core::model::{
    AssistantConfig, AssistantSpec, BatchFileCounts, BatchStatus, ConversationHandle,
    DocumentHandle, IndexBatch, IndexHandle, Message, Run,
};
use crate::core::ports::service::{AssistantServicePort, ServiceResult};

pub use capability::{negotiate, ApiVersion, ApiVersionPreference};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const MESSAGE_PAGE_LIMIT: u32 = 100;

/// Maps an HTTP error status onto the port's error taxonomy, keeping the
/// service's own message when the body carries one.
pub(crate) fn error_for_status(status: u16, body: &str) -> ServiceError {
    let message = wire::error_message(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            format!("HTTP {status}")
        } else {
            trimmed.to_string()
        }
    });
    match status {
        401 | 403 => ServiceError::Auth(message),
        404 => ServiceError::NotFound(message),
        408 | 429 => ServiceError::Transport(format!("HTTP {status}: {message}")),
        400..=499 => ServiceError::Rejected { status, message },
        _ => ServiceError::Transport(format!("HTTP {status}: {message}")),
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_decode() {
        ServiceError::Decode(err.to_string())
    } else {
        ServiceError::Transport(err.to_string())
    }
}

/// Builds the shared HTTP client with a per-request timeout.
pub fn http_client(request_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(request_timeout).build()
}

/// [`AssistantServicePort`] over the OpenAI assistants REST API.
///
/// The API version is fixed at construction. Under [`ApiVersion::V1`] there are
/// no vector stores: indexes and batches are local bookkeeping, and binding an
/// index to an assistant sets its `file_ids`.
#[derive(Clone)]
pub struct OpenAiAssistantsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    version: ApiVersion,
}

impl OpenAiAssistantsClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        version: ApiVersion,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            api_key: api_key.into(),
            version,
        }
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", self.version.beta_header())
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ServiceResult<T> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), &body));
        }
        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|err| ServiceError::Decode(err.to_string()))
    }

    async fn send_discarding(&self, request: RequestBuilder) -> ServiceResult<()> {
        self.send::<serde_json::Value>(request).await.map(|_| ())
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>) -> ServiceResult<DocumentHandle> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let file: wire::FileObject = self
            .send(self.request(Method::POST, "/files").multipart(form))
            .await?;
        Ok(file.into_handle(name))
    }

    async fn new_index(&self, name: &str) -> ServiceResult<IndexHandle> {
        if !self.version.has_vector_stores() {
            let id = format!("idx_{}", uuid::Uuid::new_v4().simple());
            log::debug!("Created local index {id} for assistants v1");
            return Ok(IndexHandle::new(id, name));
        }
        let store: wire::VectorStoreObject = self
            .send(
                self.request(Method::POST, "/vector_stores")
                    .json(&json!({ "name": name })),
            )
            .await?;
        Ok(store.into_handle(name))
    }

    async fn drop_index(&self, index_id: &str) -> ServiceResult<()> {
        if !self.version.has_vector_stores() {
            return Ok(());
        }
        let path = format!("/vector_stores/{}", urlencoding::encode(index_id));
        self.send_discarding(self.request(Method::DELETE, &path))
            .await
    }

    async fn new_batch(&self, index_id: &str, document_ids: &[String]) -> ServiceResult<IndexBatch> {
        if !self.version.has_vector_stores() {
            let total = document_ids.len() as u64;
            return Ok(IndexBatch {
                id: format!("batch_{}", uuid::Uuid::new_v4().simple()),
                index_id: index_id.to_string(),
                status: BatchStatus::Completed,
                file_counts: BatchFileCounts {
                    completed: total,
                    total,
                    ..BatchFileCounts::default()
                },
            });
        }
        let path = format!("/vector_stores/{}/file_batches", urlencoding::encode(index_id));
        let batch: wire::FileBatchObject = self
            .send(
                self.request(Method::POST, &path)
                    .json(&json!({ "file_ids": document_ids })),
            )
            .await?;
        Ok(batch.into())
    }

    async fn batch_status(&self, index_id: &str, batch_id: &str) -> ServiceResult<IndexBatch> {
        if !self.version.has_vector_stores() {
            return Ok(IndexBatch {
                id: batch_id.to_string(),
                index_id: index_id.to_string(),
                status: BatchStatus::Completed,
                file_counts: BatchFileCounts::default(),
            });
        }
        let path = format!(
            "/vector_stores/{}/file_batches/{}",
            urlencoding::encode(index_id),
            urlencoding::encode(batch_id)
        );
        let batch: wire::FileBatchObject = self.send(self.request(Method::GET, &path)).await?;
        Ok(batch.into())
    }

    async fn new_assistant(
        &self,
        spec: &AssistantSpec,
        index: Option<&IndexHandle>,
    ) -> ServiceResult<AssistantConfig> {
        let body = wire::create_assistant_body(self.version, spec, index);
        let assistant: wire::AssistantObject = self
            .send(self.request(Method::POST, "/assistants").json(&body))
            .await?;
        Ok(self.with_local_binding(assistant.into(), index))
    }

    async fn find_assistant(&self, assistant_id: &str) -> ServiceResult<AssistantConfig> {
        let path = format!("/assistants/{}", urlencoding::encode(assistant_id));
        let assistant: wire::AssistantObject = self.send(self.request(Method::GET, &path)).await?;
        Ok(assistant.into())
    }

    async fn rebind(&self, assistant_id: &str, index: &IndexHandle) -> ServiceResult<AssistantConfig> {
        let path = format!("/assistants/{}", urlencoding::encode(assistant_id));
        let body = wire::update_assistant_body(self.version, index);
        let assistant: wire::AssistantObject = self
            .send(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(self.with_local_binding(assistant.into(), Some(index)))
    }

    /// V1 responses carry no vector store ids; the binding is the index just sent.
    fn with_local_binding(
        &self,
        mut config: AssistantConfig,
        index: Option<&IndexHandle>,
    ) -> AssistantConfig {
        if config.bound_index_id.is_none() {
            config.bound_index_id = index.map(|index| index.id.clone());
        }
        config
    }

    async fn new_thread(&self) -> ServiceResult<ConversationHandle> {
        let thread: wire::ThreadObject = self
            .send(self.request(Method::POST, "/threads").json(&json!({})))
            .await?;
        Ok(thread.into())
    }

    async fn append(&self, conversation_id: &str, text: &str) -> ServiceResult<Message> {
        let path = format!("/threads/{}/messages", urlencoding::encode(conversation_id));
        let message: wire::MessageObject = self
            .send(
                self.request(Method::POST, &path)
                    .json(&json!({ "role": "user", "content": text })),
            )
            .await?;
        Ok(message.into())
    }

    async fn list(&self, conversation_id: &str) -> ServiceResult<Vec<Message>> {
        let path = format!("/threads/{}/messages", urlencoding::encode(conversation_id));
        let mut messages = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut page_path = format!("{path}?order=asc&limit={MESSAGE_PAGE_LIMIT}");
            if let Some(cursor) = after.take() {
                page_path.push_str(&format!("&after={}", urlencoding::encode(&cursor)));
            }
            let page: wire::MessageList = self.send(self.request(Method::GET, &page_path)).await?;
            let cursor = page.last_id.clone();
            messages.extend(page.data.into_iter().map(Message::from));
            match cursor {
                Some(cursor) if page.has_more => after = Some(cursor),
                _ => break,
            }
        }
        Ok(messages)
    }

    async fn new_run(&self, conversation_id: &str, assistant_id: &str) -> ServiceResult<Run> {
        let path = format!("/threads/{}/runs", urlencoding::encode(conversation_id));
        let run: wire::RunObject = self
            .send(
                self.request(Method::POST, &path)
                    .json(&json!({ "assistant_id": assistant_id })),
            )
            .await?;
        Ok(run.into())
    }

    async fn run_status(&self, conversation_id: &str, run_id: &str) -> ServiceResult<Run> {
        let path = format!(
            "/threads/{}/runs/{}",
            urlencoding::encode(conversation_id),
            urlencoding::encode(run_id)
        );
        let run: wire::RunObject = self.send(self.request(Method::GET, &path)).await?;
        Ok(run.into())
    }

    async fn cancel(&self, conversation_id: &str, run_id: &str) -> ServiceResult<Run> {
        let path = format!(
            "/threads/{}/runs/{}/cancel",
            urlencoding::encode(conversation_id),
            urlencoding::encode(run_id)
        );
        let run: wire::RunObject = self.send(self.request(Method::POST, &path)).await?;
        Ok(run.into())
    }
}

impl AssistantServicePort for OpenAiAssistantsClient {
    fn upload_file<'a>(
        &'a self,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, ServiceResult<DocumentHandle>> {
        self.upload(name, bytes).boxed()
    }

    fn delete_file<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, ServiceResult<()>> {
        let path = format!("/files/{}", urlencoding::encode(file_id));
        async move { self.send_discarding(self.request(Method::DELETE, &path)).await }.boxed()
    }

    fn create_index<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ServiceResult<IndexHandle>> {
        self.new_index(name).boxed()
    }

    fn delete_index<'a>(&'a self, index_id: &'a str) -> BoxFuture<'a, ServiceResult<()>> {
        self.drop_index(index_id).boxed()
    }

    fn create_index_batch<'a>(
        &'a self,
        index_id: &'a str,
        document_ids: &'a [String],
    ) -> BoxFuture<'a, ServiceResult<IndexBatch>> {
        self.new_batch(index_id, document_ids).boxed()
    }

    fn get_index_batch<'a>(
        &'a self,
        index_id: &'a str,
        batch_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<IndexBatch>> {
        self.batch_status(index_id, batch_id).boxed()
    }

    fn create_assistant<'a>(
        &'a self,
        spec: &'a AssistantSpec,
        index: Option<&'a IndexHandle>,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>> {
        self.new_assistant(spec, index).boxed()
    }

    fn get_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>> {
        self.find_assistant(assistant_id).boxed()
    }

    fn update_assistant_index<'a>(
        &'a self,
        assistant_id: &'a str,
        index: &'a IndexHandle,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>> {
        self.rebind(assistant_id, index).boxed()
    }

    fn create_conversation(&self) -> BoxFuture<'_, ServiceResult<ConversationHandle>> {
        self.new_thread().boxed()
    }

    fn append_user_message<'a>(
        &'a self,
        conversation_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Message>> {
        self.append(conversation_id, text).boxed()
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Vec<Message>>> {
        self.list(conversation_id).boxed()
    }

    fn create_run<'a>(
        &'a self,
        conversation_id: &'a str,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>> {
        self.new_run(conversation_id, assistant_id).boxed()
    }

    fn get_run<'a>(
        &'a self,
        conversation_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>> {
        self.run_status(conversation_id, run_id).boxed()
    }

    fn cancel_run<'a>(
        &'a self,
        conversation_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>> {
        self.cancel(conversation_id, run_id).boxed()
    }
}
