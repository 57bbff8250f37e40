use futures::future::BoxFuture;

use crate::core::error::ServiceError;
use crate::core::model::{
    AssistantConfig, AssistantSpec, ConversationHandle, DocumentHandle, IndexBatch, IndexHandle,
    Message, Run,
};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Boundary to the hosted assistants service.
///
/// Implementations own transport, authentication and wire formats. Every method
/// maps failures into [`ServiceError`]; raw transport errors never cross this trait.
pub trait AssistantServicePort: Send + Sync {
    fn upload_file<'a>(
        &'a self,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, ServiceResult<DocumentHandle>>;

    fn delete_file<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, ServiceResult<()>>;

    fn create_index<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ServiceResult<IndexHandle>>;

    fn delete_index<'a>(&'a self, index_id: &'a str) -> BoxFuture<'a, ServiceResult<()>>;

    fn create_index_batch<'a>(
        &'a self,
        index_id: &'a str,
        document_ids: &'a [String],
    ) -> BoxFuture<'a, ServiceResult<IndexBatch>>;

    fn get_index_batch<'a>(
        &'a self,
        index_id: &'a str,
        batch_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<IndexBatch>>;

    fn create_assistant<'a>(
        &'a self,
        spec: &'a AssistantSpec,
        index: Option<&'a IndexHandle>,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>>;

    fn get_assistant<'a>(
        &'a self,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>>;

    fn update_assistant_index<'a>(
        &'a self,
        assistant_id: &'a str,
        index: &'a IndexHandle,
    ) -> BoxFuture<'a, ServiceResult<AssistantConfig>>;

    fn create_conversation(&self) -> BoxFuture<'_, ServiceResult<ConversationHandle>>;

    fn append_user_message<'a>(
        &'a self,
        conversation_id: &'a str,
        text: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Message>>;

    /// Messages of a conversation in chronological order, oldest first.
    fn list_messages<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Vec<Message>>>;

    fn create_run<'a>(
        &'a self,
        conversation_id: &'a str,
        assistant_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>>;

    fn get_run<'a>(
        &'a self,
        conversation_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>>;

    fn cancel_run<'a>(
        &'a self,
        conversation_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, ServiceResult<Run>>;
}
