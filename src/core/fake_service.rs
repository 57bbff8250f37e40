//! Scripted in-memory stand-in for the hosted assistants service.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::future::{ready, BoxFuture, FutureExt};

use crate::core::error::ServiceError;
use crate::core::model::{
    AssistantConfig, AssistantSpec, BatchFileCounts, BatchStatus, ContentPart, ConversationHandle,
    DocumentHandle, IndexBatch, IndexHandle, Message, Role, Run, RunError, RunStatus,
};
use crate::core::ports::service::{AssistantServicePort, ServiceResult};

struct ScriptedRun {
    run: Run,
    remaining: VecDeque<RunStatus>,
}

struct ScriptedBatch {
    batch: IndexBatch,
    document_ids: Vec<String>,
    remaining: VecDeque<BatchStatus>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    tick: i64,
    files: HashMap<String, DocumentHandle>,
    indexes: HashMap<String, BTreeSet<String>>,
    batches: HashMap<String, ScriptedBatch>,
    assistants: HashMap<String, AssistantConfig>,
    threads: HashMap<String, Vec<Message>>,
    runs: HashMap<String, ScriptedRun>,
    run_scripts: VecDeque<Vec<RunStatus>>,
    batch_scripts: VecDeque<Vec<BatchStatus>>,
    run_error: Option<RunError>,
    failures: HashMap<&'static str, VecDeque<ServiceError>>,
    calls: HashMap<&'static str, u32>,
    deleted_files: Vec<String>,
}

impl State {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn now(&mut self) -> DateTime<Utc> {
        self.tick += 1;
        base_time() + ChronoDuration::seconds(self.tick)
    }

    fn enter(&mut self, method: &'static str) -> ServiceResult<()> {
        *self.calls.entry(method).or_default() += 1;
        match self.failures.get_mut(method).and_then(|queue| queue.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn advance_run(&mut self, run_id: &str) {
        let Some(scripted) = self.runs.get_mut(run_id) else {
            return;
        };
        let previous = scripted.run.status;
        if let Some(next) = scripted.remaining.pop_front() {
            scripted.run.status = next;
        }
        let run = scripted.run.clone();
        if run.status == RunStatus::Failed && run.last_error.is_none() {
            let error = self.run_error.clone();
            if let Some(scripted) = self.runs.get_mut(run_id) {
                scripted.run.last_error = error;
            }
        }
        if previous != RunStatus::Completed && run.status == RunStatus::Completed {
            self.post_reply(&run);
        }
    }

    fn post_reply(&mut self, run: &Run) {
        let question = self
            .threads
            .get(&run.conversation_id)
            .and_then(|messages| messages.iter().rev().find(|m| m.role == Role::User))
            .map(Message::text)
            .unwrap_or_default();
        let id = self.id("msg");
        let created_at = self.now();
        let reply = Message {
            id,
            role: Role::Assistant,
            content: vec![
                ContentPart::Text("Answer to: ".to_string()),
                ContentPart::Text(question),
            ],
            created_at,
            run_id: Some(run.id.clone()),
        };
        self.threads
            .entry(run.conversation_id.clone())
            .or_default()
            .push(reply);
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base time")
}

/// Runs follow the next queued status script, or `queued → in_progress → completed`.
/// A reply quoting the latest user message is appended when a run completes.
#[derive(Default)]
pub struct FakeAssistantService {
    state: Mutex<State>,
}

impl FakeAssistantService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("lock fake service state")
    }

    /// Status sequence for the next created run; the first entry is the creation status.
    pub fn script_run(&self, statuses: &[RunStatus]) {
        self.state().run_scripts.push_back(statuses.to_vec());
    }

    /// Status sequence for the next created index batch.
    pub fn script_batch(&self, statuses: &[BatchStatus]) {
        self.state().batch_scripts.push_back(statuses.to_vec());
    }

    pub fn set_run_error(&self, code: &str, message: &str) {
        self.state().run_error = Some(RunError {
            code: Some(code.to_string()),
            message: message.to_string(),
        });
    }

    /// Makes the next call to `method` fail with `err`.
    pub fn fail_next(&self, method: &'static str, err: ServiceError) {
        self.state()
            .failures
            .entry(method)
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self, method: &str) -> u32 {
        self.state().calls.get(method).copied().unwrap_or_default()
    }

    pub fn deleted_files(&self) -> Vec<String> {
        self.state().deleted_files.clone()
    }

    pub fn index_members(&self, index_id: &str) -> Option<BTreeSet<String>> {
        self.state().indexes.get(index_id).cloned()
    }

    pub fn assistant(&self, assistant_id: &str) -> Option<AssistantConfig> {
        self.state().assistants.get(assistant_id).cloned()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.state()
            .threads
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert_assistant(&self, config: AssistantConfig) {
        self.state().assistants.insert(config.id.clone(), config);
    }

    fn upload(&self, name: &str, bytes: &[u8]) -> ServiceResult<DocumentHandle> {
        let mut state = self.state();
        state.enter("upload_file")?;
        if bytes.is_empty() {
            return Err(ServiceError::Rejected {
                status: 400,
                message: "File is empty.".to_string(),
            });
        }
        let handle = DocumentHandle {
            id: state.id("file"),
            display_name: name.to_string(),
            upload_time: state.now(),
        };
        state.files.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    fn delete(&self, file_id: &str) -> ServiceResult<()> {
        let mut state = self.state();
        state.enter("delete_file")?;
        if state.files.remove(file_id).is_none() {
            return Err(ServiceError::NotFound(format!("No such File object: {file_id}")));
        }
        for members in state.indexes.values_mut() {
            members.remove(file_id);
        }
        state.deleted_files.push(file_id.to_string());
        Ok(())
    }

    fn new_index(&self, name: &str) -> ServiceResult<IndexHandle> {
        let mut state = self.state();
        state.enter("create_index")?;
        let id = state.id("vs");
        state.indexes.insert(id.clone(), BTreeSet::new());
        Ok(IndexHandle::new(id, name))
    }

    fn drop_index(&self, index_id: &str) -> ServiceResult<()> {
        let mut state = self.state();
        state.enter("delete_index")?;
        state
            .indexes
            .remove(index_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("No vector store found: {index_id}")))
    }

    fn new_batch(&self, index_id: &str, document_ids: &[String]) -> ServiceResult<IndexBatch> {
        let mut state = self.state();
        state.enter("create_index_batch")?;
        if !state.indexes.contains_key(index_id) {
            return Err(ServiceError::NotFound(format!("No vector store found: {index_id}")));
        }
        if let Some(unknown) = document_ids.iter().find(|id| !state.files.contains_key(*id)) {
            return Err(ServiceError::Rejected {
                status: 400,
                message: format!("File {unknown} not found"),
            });
        }
        let mut remaining: VecDeque<BatchStatus> = state
            .batch_scripts
            .pop_front()
            .unwrap_or_else(|| vec![BatchStatus::InProgress, BatchStatus::Completed])
            .into();
        let status = remaining.pop_front().unwrap_or(BatchStatus::Completed);
        let batch = IndexBatch {
            id: state.id("vsfb"),
            index_id: index_id.to_string(),
            status,
            file_counts: BatchFileCounts {
                in_progress: document_ids.len() as u64,
                total: document_ids.len() as u64,
                ..BatchFileCounts::default()
            },
        };
        state.batches.insert(
            batch.id.clone(),
            ScriptedBatch {
                batch: batch.clone(),
                document_ids: document_ids.to_vec(),
                remaining,
            },
        );
        if status == BatchStatus::Completed {
            if let Some(members) = state.indexes.get_mut(index_id) {
                members.extend(document_ids.iter().cloned());
            }
        }
        Ok(batch)
    }

    fn batch_status(&self, index_id: &str, batch_id: &str) -> ServiceResult<IndexBatch> {
        let mut state = self.state();
        state.enter("get_index_batch")?;
        let scripted = state
            .batches
            .get_mut(batch_id)
            .filter(|b| b.batch.index_id == index_id)
            .ok_or_else(|| ServiceError::NotFound(format!("No batch found: {batch_id}")))?;
        if let Some(next) = scripted.remaining.pop_front() {
            scripted.batch.status = next;
        }
        let total = scripted.document_ids.len() as u64;
        scripted.batch.file_counts = match scripted.batch.status {
            BatchStatus::InProgress => BatchFileCounts {
                in_progress: total,
                total,
                ..BatchFileCounts::default()
            },
            BatchStatus::Completed => BatchFileCounts {
                completed: total,
                total,
                ..BatchFileCounts::default()
            },
            BatchStatus::Failed => BatchFileCounts {
                failed: total,
                total,
                ..BatchFileCounts::default()
            },
            BatchStatus::Cancelled => BatchFileCounts {
                cancelled: total,
                total,
                ..BatchFileCounts::default()
            },
        };
        let batch = scripted.batch.clone();
        let document_ids = scripted.document_ids.clone();
        if batch.status == BatchStatus::Completed {
            if let Some(members) = state.indexes.get_mut(index_id) {
                members.extend(document_ids);
            }
        }
        Ok(batch)
    }

    fn new_assistant(
        &self,
        spec: &AssistantSpec,
        index: Option<&IndexHandle>,
    ) -> ServiceResult<AssistantConfig> {
        let mut state = self.state();
        state.enter("create_assistant")?;
        let config = AssistantConfig {
            id: state.id("asst"),
            name: spec.name.clone(),
            model: spec.model.clone(),
            instructions: spec.instructions.clone(),
            bound_index_id: index.map(|index| index.id.clone()),
        };
        state.assistants.insert(config.id.clone(), config.clone());
        Ok(config)
    }

    fn find_assistant(&self, assistant_id: &str) -> ServiceResult<AssistantConfig> {
        let mut state = self.state();
        state.enter("get_assistant")?;
        state
            .assistants
            .get(assistant_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("No assistant found with id '{assistant_id}'.")))
    }

    fn rebind(&self, assistant_id: &str, index: &IndexHandle) -> ServiceResult<AssistantConfig> {
        let mut state = self.state();
        state.enter("update_assistant_index")?;
        let config = state
            .assistants
            .get_mut(assistant_id)
            .ok_or_else(|| ServiceError::NotFound(format!("No assistant found with id '{assistant_id}'.")))?;
        config.bound_index_id = Some(index.id.clone());
        Ok(config.clone())
    }

    fn new_conversation(&self) -> ServiceResult<ConversationHandle> {
        let mut state = self.state();
        state.enter("create_conversation")?;
        let handle = ConversationHandle {
            id: state.id("thread"),
            created_at: state.now(),
        };
        state.threads.insert(handle.id.clone(), Vec::new());
        Ok(handle)
    }

    fn append(&self, conversation_id: &str, text: &str) -> ServiceResult<Message> {
        let mut state = self.state();
        state.enter("append_user_message")?;
        if !state.threads.contains_key(conversation_id) {
            return Err(ServiceError::NotFound(format!(
                "No thread found with id '{conversation_id}'."
            )));
        }
        let message = Message {
            id: state.id("msg"),
            role: Role::User,
            content: vec![ContentPart::Text(text.to_string())],
            created_at: state.now(),
            run_id: None,
        };
        if let Some(messages) = state.threads.get_mut(conversation_id) {
            messages.push(message.clone());
        }
        Ok(message)
    }

    fn list(&self, conversation_id: &str) -> ServiceResult<Vec<Message>> {
        let mut state = self.state();
        state.enter("list_messages")?;
        state
            .threads
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("No thread found with id '{conversation_id}'.")))
    }

    fn new_run(&self, conversation_id: &str, assistant_id: &str) -> ServiceResult<Run> {
        let mut state = self.state();
        state.enter("create_run")?;
        if !state.threads.contains_key(conversation_id) {
            return Err(ServiceError::NotFound(format!(
                "No thread found with id '{conversation_id}'."
            )));
        }
        if !state.assistants.contains_key(assistant_id) {
            return Err(ServiceError::NotFound(format!(
                "No assistant found with id '{assistant_id}'."
            )));
        }
        let active = state.runs.values().any(|scripted| {
            scripted.run.conversation_id == conversation_id && !scripted.run.status.is_terminal()
        });
        if active {
            return Err(ServiceError::Rejected {
                status: 400,
                message: format!("Thread {conversation_id} already has an active run."),
            });
        }
        let mut remaining: VecDeque<RunStatus> = state
            .run_scripts
            .pop_front()
            .unwrap_or_else(|| {
                vec![RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed]
            })
            .into();
        let status = remaining.pop_front().unwrap_or(RunStatus::Queued);
        let run = Run {
            id: state.id("run"),
            conversation_id: conversation_id.to_string(),
            assistant_id: assistant_id.to_string(),
            status: RunStatus::Queued,
            last_error: None,
        };
        state.runs.insert(
            run.id.clone(),
            ScriptedRun {
                run: run.clone(),
                remaining: std::iter::once(status).chain(remaining).collect(),
            },
        );
        state.advance_run(&run.id);
        Ok(state.runs[&run.id].run.clone())
    }

    fn run_status(&self, conversation_id: &str, run_id: &str) -> ServiceResult<Run> {
        let mut state = self.state();
        state.enter("get_run")?;
        let known = state
            .runs
            .get(run_id)
            .is_some_and(|scripted| scripted.run.conversation_id == conversation_id);
        if !known {
            return Err(ServiceError::NotFound(format!("No run found with id '{run_id}'.")));
        }
        state.advance_run(run_id);
        Ok(state.runs[run_id].run.clone())
    }

    fn cancel(&self, conversation_id: &str, run_id: &str) -> ServiceResult<Run> {
        let mut state = self.state();
        state.enter("cancel_run")?;
        let scripted = state
            .runs
            .get_mut(run_id)
            .filter(|scripted| scripted.run.conversation_id == conversation_id)
            .ok_or_else(|| ServiceError::NotFound(format!("No run found with id '{run_id}'.")))?;
        if scripted.run.status.is_terminal() {
            return Err(ServiceError::Rejected {
                status: 400,
                message: format!(
                    "Cannot cancel run with status '{}'.",
                    scripted.run.status.as_str()
                ),
            });
        }
        scripted.run.status = RunStatus::Cancelling;
        scripted.remaining = VecDeque::from(vec![RunStatus::Cancelled]);
        Ok(scripted.run.clone())
    }
}

impl AssistantServicePort for FakeAssistantService {
    fn upload_file<'a>(
        &'a self,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, ServiceResult<DocumentHandle>> {
        ready(self.upload(name, &bytes)).boxed()
    }

    fn delete_file<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, ServiceResult<()>> {
        ready(self.delete(file_id)).boxed()
    }

    fn create_index<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ServiceResult<IndexHandle>> {
        ready(self.new_index(name)).boxed()
    }

    fn delete_index<'a>(&'a self, index_id: &'a str) -> BoxFuture<'a, ServiceResult<()>> {
        ready(self.drop_index(index_id)).boxed()
    }

    fn create_index_batch<'a>(
        &'a self,
        index_id: &'a str,
        document_ids: &'a [String],
    ) -> BoxFuture<'a, ServiceResult<IndexBatch>> {
        ready(self.new_batch(index_id, document_ids)).boxed()
    }

    fn get_index_batch<'a>(
        &'a self,
        index_id: &'a str,
        batch_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<IndexBatch>> {
        ready(self.batch_status(index_id, batch_id)).boxed()
    }

    fn create_assistant<'a>(
        &'a self,
        spec: &'a AssistantSpec,
        index: Option<&'a IndexHandle>,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>> {
        ready(self.new_assistant(spec, index)).boxed()
    }

    fn get_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>> {
        ready(self.find_assistant(assistant_id)).boxed()
    }

    fn update_assistant_index<'a>(
        &'a self,
        assistant_id: &'a str,
        index: &'a IndexHandle,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>> {
        ready(self.rebind(assistant_id, index)).boxed()
    }

    fn create_conversation(&self) -> BoxFuture<'_, ServiceResult<ConversationHandle>> {
        ready(self.new_conversation()).boxed()
    }

    fn append_user_message<'a>(
        &'a self,
        conversation_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Message>> {
        ready(self.append(conversation_id, text)).boxed()
    }

    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Vec<Message>>> {
        ready(self.list(conversation_id)).boxed()
    }

    fn create_run<'a>(
        &'a self,
        conversation_id: &'a str,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>> {
        ready(self.new_run(conversation_id, assistant_id)).boxed()
    }

    fn get_run<'a>(
        &'a self,
        conversation_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>> {
        ready(self.run_status(conversation_id, run_id)).boxed()
    }

    fn cancel_run<'a>(
        &'a self,
        conversation_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>> {
        ready(self.cancel(conversation_id, run_id)).boxed()
    }
}
