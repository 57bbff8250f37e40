use std::sync::Arc;

use crate::core::error::{ChatResult, Operation, ServiceResultExt};
use crate::core::model::{AssistantConfig, AssistantSpec, IndexHandle};
use crate::core::ports::service::AssistantServicePort;

pub struct AssistantRegistry {
    service: Arc<dyn AssistantServicePort>,
}

impl AssistantRegistry {
    pub fn new(service: Arc<dyn AssistantServicePort>) -> Self {
        Self { service }
    }

    /// Retrieves the assistant behind `persisted_id`, or creates a new one from `spec`.
    ///
    /// Any retrieval failure (stale id, revoked access, network trouble) falls back to
    /// creation. The caller persists the returned id for reuse.
    pub async fn create_or_get(
        &self,
        persisted_id: Option<&str>,
        spec: &AssistantSpec,
        index: Option<&IndexHandle>,
    ) -> ChatResult<AssistantConfig> {
        if let Some(id) = persisted_id {
            match self.service.get_assistant(id).await {
                Ok(config) => {
                    log::info!("Reusing assistant {} ({})", config.name, config.id);
                    return Ok(config);
                }
                Err(err) => {
                    log::warn!("Could not retrieve assistant {id}: {err}. Creating a new one.");
                }
            }
        }

        let config = self
            .service
            .create_assistant(spec, index)
            .await
            .during(Operation::CreateAssistant)?;
        log::info!(
            "Created assistant {} ({}) on model {}",
            config.name,
            config.id,
            config.model
        );
        Ok(config)
    }

    /// Points the assistant's retrieval tool at `index`. Always issues the update,
    /// even when the assistant is already bound to it.
    pub async fn rebind_index(
        &self,
        assistant_id: &str,
        index: &IndexHandle,
    ) -> ChatResult<AssistantConfig> {
        let config = self
            .service
            .update_assistant_index(assistant_id, index)
            .await
            .during(Operation::UpdateAssistant)?;
        log::info!("Assistant {} bound to index {}", assistant_id, index.id);
        Ok(config)
    }
}
