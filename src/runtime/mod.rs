pub mod cli;

use std::sync::Arc;

use crate::adapters::config::{ApiKeyError, Settings};
use crate::adapters::openai::{self, negotiate, ApiVersion, OpenAiAssistantsClient};
use crate::adapters::registry::LocalRegistryStore;
use crate::core::error::ServiceError;
use crate::core::session::{DocChat, SessionContext};

/// Conditions that stop the process before any command runs.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid API key: {0}")]
    Credential(#[from] ApiKeyError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("the service rejected the API key: {0}")]
    Unauthorized(String),
}

/// Everything a command needs once startup has succeeded.
pub struct Session {
    pub settings: Settings,
    pub chat: DocChat,
    pub ctx: SessionContext,
    pub store: LocalRegistryStore,
    pub version: ApiVersion,
}

/// Validates the credential, negotiates the API version and restores the
/// session from the registry.
pub async fn bootstrap(settings: Settings) -> Result<Session, StartupError> {
    let api_key = settings.api_key()?.to_string();
    let http = openai::http_client(settings.request_timeout())?;

    let version = match negotiate(&http, &settings.api_base_url, &api_key, settings.api_version).await
    {
        Ok(version) => version,
        Err(ServiceError::Auth(message)) => return Err(StartupError::Unauthorized(message)),
        Err(err) => {
            log::warn!("Could not probe the assistants API ({err}); assuming v2");
            ApiVersion::V2
        }
    };

    let client = OpenAiAssistantsClient::new(http, settings.api_base_url.clone(), api_key, version);
    let store = LocalRegistryStore::new(settings.registry_path());
    let registry = store.load();
    log::info!(
        "Loaded registry {} ({} documents)",
        store.path().display(),
        registry.documents.len()
    );
    let ctx = SessionContext::from_registry(registry);

    let chat = DocChat::new(Arc::new(client))
        .with_registry(store.clone())
        .with_run_policy(settings.run_poll_policy())
        .with_index_policy(settings.index_poll_policy());

    Ok(Session {
        settings,
        chat,
        ctx,
        store,
        version,
    })
}
