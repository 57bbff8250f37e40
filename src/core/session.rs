use std::sync::Arc;
use std::time::Duration;

use crate::adapters::registry::{LocalRegistryStore, RegistrySnapshot};
use crate::core::assistants::AssistantRegistry;
use crate::core::conversation::ConversationSession;
use crate::core::documents::RemoteDocumentStore;
use crate::core::error::{ChatError, ChatResult};
use crate::core::model::{
    AssistantConfig, AssistantSpec, ConversationHandle, DocumentHandle, IndexHandle, Run,
};
use crate::core::ports::service::AssistantServicePort;
use crate::core::run::{PollPolicy, RunLifecycleClient, RunOutcome};

/// Identifiers for one chat session, owned by the caller and passed to every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub conversation_id: Option<String>,
    pub assistant_id: Option<String>,
    pub index: Option<IndexHandle>,
    /// Mirror of the on-disk registry; rewritten after each mutation when a store is attached.
    pub registry: RegistrySnapshot,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores assistant and index ids from a persisted registry. Every registered
    /// document is assumed to be a member of the persisted index.
    pub fn from_registry(registry: RegistrySnapshot) -> Self {
        let index = registry.vector_store_id.as_ref().map(|id| IndexHandle {
            id: id.clone(),
            name: id.clone(),
            member_document_ids: registry.file_ids().into_iter().collect(),
        });
        Self {
            conversation_id: None,
            assistant_id: registry.assistant_id.clone(),
            index,
            registry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

pub fn default_index_name() -> String {
    format!("Documents - {}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Caller-facing entry point: upload, index, assistant, conversation, ask.
pub struct DocChat {
    documents: RemoteDocumentStore,
    assistants: AssistantRegistry,
    conversations: ConversationSession,
    runs: RunLifecycleClient,
    registry: Option<LocalRegistryStore>,
    run_policy: PollPolicy,
    index_policy: PollPolicy,
}

impl DocChat {
    pub fn new(service: Arc<dyn AssistantServicePort>) -> Self {
        Self {
            documents: RemoteDocumentStore::new(service.clone()),
            assistants: AssistantRegistry::new(service.clone()),
            conversations: ConversationSession::new(service.clone()),
            runs: RunLifecycleClient::new(service),
            registry: None,
            run_policy: PollPolicy::default(),
            index_policy: PollPolicy::default().with_timeout(Duration::from_secs(300)),
        }
    }

    pub fn with_registry(mut self, store: LocalRegistryStore) -> Self {
        self.registry = Some(store);
        self
    }

    pub fn with_run_policy(mut self, policy: PollPolicy) -> Self {
        self.run_policy = policy;
        self
    }

    pub fn with_index_policy(mut self, policy: PollPolicy) -> Self {
        self.index_policy = policy;
        self
    }

    pub fn run_policy(&self) -> &PollPolicy {
        &self.run_policy
    }

    pub fn documents(&self) -> &RemoteDocumentStore {
        &self.documents
    }

    pub fn conversations(&self) -> &ConversationSession {
        &self.conversations
    }

    /// Uploads `files` in order and records each one in the registry as it lands.
    /// Stops at the first failure; files uploaded before it stay registered.
    pub async fn upload_documents(
        &self,
        ctx: &mut SessionContext,
        files: Vec<UploadFile>,
    ) -> ChatResult<Vec<DocumentHandle>> {
        let mut handles = Vec::with_capacity(files.len());
        for file in files {
            let handle = self.documents.upload(&file.name, file.bytes).await?;
            ctx.registry.record_document(&handle);
            self.persist(ctx);
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Ensures `ctx` has an index holding `document_ids`, creating one on first use.
    /// If an assistant is already known and the index changed, it is rebound.
    pub async fn build_or_rebind_index(
        &self,
        ctx: &mut SessionContext,
        document_ids: &[String],
    ) -> ChatResult<IndexHandle> {
        let (mut index, created) = match ctx.index.take() {
            Some(index) => (index, false),
            None => (self.documents.create_index(&default_index_name()).await?, true),
        };

        let populated = self
            .populate_index(&mut index, created, ctx.assistant_id.as_deref(), document_ids)
            .await;
        if created {
            ctx.registry.vector_store_id = Some(index.id.clone());
            self.persist(ctx);
        }
        ctx.index = Some(index.clone());
        populated.map(|()| index)
    }

    async fn populate_index(
        &self,
        index: &mut IndexHandle,
        created: bool,
        assistant_id: Option<&str>,
        document_ids: &[String],
    ) -> ChatResult<()> {
        let added = self
            .documents
            .add_documents_to_index(index, document_ids, &self.index_policy)
            .await?;
        if created || added.is_some() {
            if let Some(assistant_id) = assistant_id {
                self.assistants.rebind_index(assistant_id, index).await?;
            }
        }
        Ok(())
    }

    /// Reuses the session's assistant when it still exists, otherwise creates one from
    /// `spec`, then makes sure it searches the session's index.
    pub async fn ensure_assistant(
        &self,
        ctx: &mut SessionContext,
        spec: &AssistantSpec,
    ) -> ChatResult<AssistantConfig> {
        let mut config = self
            .assistants
            .create_or_get(ctx.assistant_id.as_deref(), spec, ctx.index.as_ref())
            .await?;

        if let Some(index) = ctx.index.as_ref() {
            if config.bound_index_id.as_deref() != Some(index.id.as_str()) {
                config = self.assistants.rebind_index(&config.id, index).await?;
            }
        }

        ctx.assistant_id = Some(config.id.clone());
        if ctx.registry.assistant_id.as_deref() != Some(config.id.as_str()) {
            ctx.registry.assistant_id = Some(config.id.clone());
            self.persist(ctx);
        }
        Ok(config)
    }

    pub async fn start_conversation(
        &self,
        ctx: &mut SessionContext,
    ) -> ChatResult<ConversationHandle> {
        let conversation = self.conversations.create().await?;
        ctx.conversation_id = Some(conversation.id.clone());
        Ok(conversation)
    }

    /// One user turn: append `text`, run the assistant, and return its reply.
    pub async fn ask(
        &self,
        conversation_id: &str,
        assistant_id: &str,
        text: &str,
        timeout: Duration,
    ) -> ChatResult<String> {
        self.conversations
            .append_user_message(conversation_id, text)
            .await?;
        let run = self.runs.submit(conversation_id, assistant_id).await?;
        let policy = self.run_policy.clone().with_timeout(timeout);
        self.runs
            .await_completion(run, &policy)
            .await?
            .into_reply()
    }

    /// [`Self::ask`] using the ids held by `ctx` and the configured run timeout.
    pub async fn ask_in_session(&self, ctx: &SessionContext, text: &str) -> ChatResult<String> {
        let conversation_id = ctx.conversation_id.as_deref().ok_or_else(|| {
            ChatError::Configuration("no conversation started for this session".to_string())
        })?;
        let assistant_id = ctx.assistant_id.as_deref().ok_or_else(|| {
            ChatError::Configuration("no assistant configured for this session".to_string())
        })?;
        self.ask(conversation_id, assistant_id, text, self.run_policy.timeout)
            .await
    }

    pub async fn cancel_run(&self, conversation_id: &str, run_id: &str) -> ChatResult<Run> {
        self.runs.cancel(conversation_id, run_id).await
    }

    /// Cancels a run the caller stopped waiting for and polls it until it settles,
    /// after which the conversation accepts a new run.
    pub async fn abandon_run(
        &self,
        conversation_id: &str,
        run_id: &str,
    ) -> ChatResult<RunOutcome> {
        let run = self.runs.cancel(conversation_id, run_id).await?;
        self.runs.await_completion(run, &self.run_policy).await
    }

    /// Removes a document from the session. The remote delete is best-effort; the
    /// local record is dropped regardless. An assistant bound to the session index
    /// is rebound so it stops referencing the file.
    pub async fn delete_document(&self, ctx: &mut SessionContext, file_id: &str) {
        self.documents.delete_document(file_id).await;
        let removed = ctx
            .index
            .as_mut()
            .is_some_and(|index| index.member_document_ids.remove(file_id));
        if let (true, Some(assistant_id), Some(index)) =
            (removed, ctx.assistant_id.as_deref(), ctx.index.as_ref())
        {
            if let Err(err) = self.assistants.rebind_index(assistant_id, index).await {
                log::warn!(
                    "Failed to rebind assistant {assistant_id} after deleting {file_id}: {err}"
                );
            }
        }
        if ctx.registry.remove_document(file_id).is_some() {
            self.persist(ctx);
        }
    }

    fn persist(&self, ctx: &SessionContext) {
        if let Some(store) = &self.registry {
            if let Err(err) = store.save(&ctx.registry) {
                log::warn!("Failed to persist document registry: {err}");
            }
        }
    }
}
