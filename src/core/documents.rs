use std::sync::Arc;

use crate::core::error::{ChatError, ChatResult, Operation, ServiceError, ServiceResultExt};
use crate::core::model::{BatchStatus, DocumentHandle, IndexBatch, IndexHandle};
use crate::core::ports::service::AssistantServicePort;
use crate::core::run::{poll_until_terminal, PollOutcome, PollPolicy};

/// Uploads documents and groups them into a searchable index.
pub struct RemoteDocumentStore {
    service: Arc<dyn AssistantServicePort>,
}

impl RemoteDocumentStore {
    pub fn new(service: Arc<dyn AssistantServicePort>) -> Self {
        Self { service }
    }

    pub async fn upload(&self, name: &str, bytes: Vec<u8>) -> ChatResult<DocumentHandle> {
        let size = bytes.len();
        let handle = self
            .service
            .upload_file(name, bytes)
            .await
            .during(Operation::Upload)?;
        log::info!("Uploaded {} ({} bytes) as {}", name, size, handle.id);
        Ok(handle)
    }

    pub async fn create_index(&self, name: &str) -> ChatResult<IndexHandle> {
        let index = self
            .service
            .create_index(name)
            .await
            .during(Operation::CreateIndex)?;
        log::info!("Created index {} ({})", index.name, index.id);
        Ok(index)
    }

    /// Adds documents to `index` and waits until the service reports the batch done.
    ///
    /// On success the documents are searchable and recorded as members of `index`.
    /// Documents that are already members are skipped; if nothing is left to add,
    /// no remote call is made and `None` is returned.
    pub async fn add_documents_to_index(
        &self,
        index: &mut IndexHandle,
        document_ids: &[String],
        policy: &PollPolicy,
    ) -> ChatResult<Option<IndexBatch>> {
        let pending: Vec<String> = index
            .missing_members(document_ids)
            .into_iter()
            .cloned()
            .collect();
        if pending.is_empty() {
            log::debug!("Index {} already holds all requested documents", index.id);
            return Ok(None);
        }

        let batch = self
            .service
            .create_index_batch(&index.id, &pending)
            .await
            .during(Operation::IndexBatch)?;
        log::info!(
            "Submitted batch {} of {} documents to index {}",
            batch.id,
            pending.len(),
            index.id
        );

        let service = self.service.as_ref();
        let batch_id = batch.id.clone();
        let (index_id, batch_id) = (index.id.as_str(), batch_id.as_str());
        let polled = poll_until_terminal(
            batch,
            policy,
            |batch: &IndexBatch| batch.status.is_terminal(),
            move || async move {
                let batch = service.get_index_batch(index_id, batch_id).await?;
                log::debug!("Index batch {} status: {}", batch_id, batch.status.as_str());
                Ok::<IndexBatch, ServiceError>(batch)
            },
        )
        .await
        .during(Operation::IndexBatch)?;

        let batch = match polled {
            PollOutcome::Terminal { value, .. } => value,
            PollOutcome::TimedOut { last, .. } => {
                return Err(ChatError::IndexBatchTimedOut {
                    batch_id: last.id,
                    timeout: policy.timeout,
                });
            }
        };

        match batch.status {
            BatchStatus::Completed => {
                if batch.file_counts.failed > 0 {
                    log::warn!(
                        "Index batch {} completed with {} of {} files failed",
                        batch.id,
                        batch.file_counts.failed,
                        batch.file_counts.total
                    );
                }
                index.member_document_ids.extend(pending);
                log::info!(
                    "Index {} now holds {} documents",
                    index.id,
                    index.member_document_ids.len()
                );
                Ok(Some(batch))
            }
            status => Err(ChatError::RemoteJobFailed {
                op: Operation::IndexBatch,
                job_id: batch.id,
                status: status.as_str().to_string(),
                code: None,
                detail: format!(
                    "{} of {} files failed, {} cancelled",
                    batch.file_counts.failed, batch.file_counts.total, batch.file_counts.cancelled
                ),
            }),
        }
    }

    /// Best-effort delete. Failures are logged and never returned.
    pub async fn delete_document(&self, document_id: &str) {
        match self.service.delete_file(document_id).await {
            Ok(()) => log::info!("Deleted document {document_id}"),
            Err(err) => log::warn!(
                "{}",
                ChatError::from_service(Operation::DeleteDocument, err)
            ),
        }
    }

    /// Best-effort index teardown, same policy as [`Self::delete_document`].
    pub async fn delete_index(&self, index_id: &str) {
        match self.service.delete_index(index_id).await {
            Ok(()) => log::info!("Deleted index {index_id}"),
            Err(err) => log::warn!("{}", ChatError::from_service(Operation::DeleteIndex, err)),
        }
    }
}
