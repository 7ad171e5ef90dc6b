//! Instance metadata lookup.
//!
//! Reads this node's provider instance id and region from the link-local
//! metadata service once at startup.

use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::backend::BackendError;

/// Metadata document served to every instance
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/v1.json";

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct MetadataDocument {
    #[serde(rename = "instance-v2-id")]
    instance_v2_id: String,
    region: MetadataRegion,
}

#[derive(Debug, Deserialize)]
struct MetadataRegion {
    regioncode: String,
}

/// Identity of the node the plugin runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub instance_id: String,
    /// Region id as used by the API (lowercase)
    pub region: String,
}

impl NodeMetadata {
    fn parse(body: &str) -> Result<Self, BackendError> {
        let doc: MetadataDocument = serde_json::from_str(body)
            .map_err(|e| BackendError::InvalidResponse(format!("metadata: {}", e)))?;
        if doc.instance_v2_id.is_empty() {
            return Err(BackendError::InvalidResponse(
                "metadata: empty instance id".into(),
            ));
        }
        Ok(Self {
            instance_id: doc.instance_v2_id,
            region: doc.region.regioncode.to_lowercase(),
        })
    }
}

/// Fetch node metadata from `url`.
pub async fn fetch(url: &str) -> Result<NodeMetadata, BackendError> {
    let client = reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .build()
        .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

    let body = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| BackendError::Transient(format!("metadata service: {}", e)))?
        .text()
        .await
        .map_err(|e| BackendError::Transient(format!("metadata service: {}", e)))?;

    let metadata = NodeMetadata::parse(&body)?;
    info!(instance_id = %metadata.instance_id, region = %metadata.region, "Loaded instance metadata");
    Ok(metadata)
}
