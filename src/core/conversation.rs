use std::sync::Arc;

use crate::core::error::{ChatResult, Operation, ServiceResultExt};
use crate::core::model::{ConversationHandle, Message};
use crate::core::ports::service::AssistantServicePort;

/// Append-only message log the run lifecycle operates on.
pub struct ConversationSession {
    service: Arc<dyn AssistantServicePort>,
}

impl ConversationSession {
    pub fn new(service: Arc<dyn AssistantServicePort>) -> Self {
        Self { service }
    }

    pub async fn create(&self) -> ChatResult<ConversationHandle> {
        let conversation = self
            .service
            .create_conversation()
            .await
            .during(Operation::CreateConversation)?;
        log::info!("Started conversation {}", conversation.id);
        Ok(conversation)
    }

    pub async fn append_user_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> ChatResult<Message> {
        self.service
            .append_user_message(conversation_id, text)
            .await
            .during(Operation::AppendMessage)
    }

    pub async fn list_messages(&self, conversation_id: &str) -> ChatResult<Vec<Message>> {
        self.service
            .list_messages(conversation_id)
            .await
            .during(Operation::ListMessages)
    }
}
