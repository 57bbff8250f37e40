use serde::{Deserialize, Serialize};

use crate::core::error::ServiceError;

use super::{error_for_status, transport_error};

/// Which generation of the assistants API the client speaks.
///
/// `V2` indexes documents in vector stores searched by the `file_search` tool.
/// `V1` has no vector stores: the `retrieval` tool reads the assistant's
/// `file_ids` directly, so an index only exists on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn beta_header(self) -> &'static str {
        match self {
            ApiVersion::V1 => "assistants=v1",
            ApiVersion::V2 => "assistants=v2",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }

    pub fn has_vector_stores(self) -> bool {
        self == ApiVersion::V2
    }
}

/// Version setting as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersionPreference {
    #[default]
    Auto,
    V1,
    V2,
}

impl ApiVersionPreference {
    pub fn pinned(self) -> Option<ApiVersion> {
        match self {
            ApiVersionPreference::Auto => None,
            ApiVersionPreference::V1 => Some(ApiVersion::V1),
            ApiVersionPreference::V2 => Some(ApiVersion::V2),
        }
    }
}

/// Picks the API version once, before any other call.
///
/// A pinned preference is returned without touching the network. Otherwise the
/// vector store listing is probed with the v2 beta header.
pub async fn negotiate(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    preference: ApiVersionPreference,
) -> Result<ApiVersion, ServiceError> {
    if let Some(version) = preference.pinned() {
        log::info!("Using pinned assistants API {}", version.as_str());
        return Ok(version);
    }

    let url = format!("{}/vector_stores?limit=1", base_url.trim_end_matches('/'));
    let response = http
        .get(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("OpenAI-Beta", ApiVersion::V2.beta_header())
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status().as_u16();
    let body = if response.status().is_success() {
        String::new()
    } else {
        response.text().await.unwrap_or_default()
    };
    let version = classify_probe(status, &body)?;
    log::info!("Negotiated assistants API {}", version.as_str());
    Ok(version)
}

pub(crate) fn classify_probe(status: u16, body: &str) -> Result<ApiVersion, ServiceError> {
    match status {
        200..=299 => Ok(ApiVersion::V2),
        400 | 404 => {
            log::warn!("Vector stores unavailable (HTTP {status}); falling back to assistants v1");
            Ok(ApiVersion::V1)
        }
        _ => Err(error_for_status(status, body)),
    }
}
