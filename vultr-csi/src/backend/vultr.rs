//! Vultr v2 block storage client.
//!
//! Thin wrapper over the provider's REST API for the operations the plugin
//! needs. Every request is one-shot with a bounded timeout; transient
//! failures are reported as [`BackendError::Transient`] and left to the
//! caller's poll loop or the orchestrator's retry.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    BackendError, Instance, RegionCapacity, Result, Volume, VolumeBackend, VolumePage,
    VolumeStatus,
};
use crate::types::{GIB, MAX_VOLUME_SIZE_GB, MIN_VOLUME_SIZE_GB};

/// Default provider API base URL
pub const DEFAULT_API_URL: &str = "https://api.vultr.com";

/// Page size used when scanning regions
const REGION_PAGE_SIZE: u32 = 500;

/// Region option advertising block storage support
const BLOCK_STORAGE_OPTION_PREFIX: &str = "block_storage";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Block {
    id: String,
    status: String,
    size_gb: u64,
    region: String,
    #[serde(default)]
    attached_to_instance: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    mount_id: String,
}

#[derive(Debug, Deserialize)]
struct BlockEnvelope {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct BlocksEnvelope {
    blocks: Vec<Block>,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: String,
}

#[derive(Debug, Deserialize)]
struct ApiInstance {
    id: String,
    region: String,
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    instance: ApiInstance,
}

#[derive(Debug, Deserialize)]
struct ApiRegion {
    id: String,
    #[serde(default)]
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegionsEnvelope {
    regions: Vec<ApiRegion>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Serialize)]
struct CreateBlockRequest<'a> {
    region: &'a str,
    size_gb: u64,
    label: &'a str,
}

#[derive(Debug, Serialize)]
struct AttachBlockRequest<'a> {
    instance_id: &'a str,
    live: bool,
}

#[derive(Debug, Serialize)]
struct DetachBlockRequest {
    live: bool,
}

#[derive(Debug, Serialize)]
struct UpdateBlockRequest {
    size_gb: u64,
}

impl Block {
    fn into_volume(self) -> Volume {
        let attached_to = (!self.attached_to_instance.is_empty()).then_some(self.attached_to_instance);
        let status = match self.status.as_str() {
            "pending" => VolumeStatus::Creating,
            "active" if attached_to.is_some() => VolumeStatus::Attached,
            "active" => VolumeStatus::Available,
            "deleting" => VolumeStatus::Deleting,
            other => {
                warn!(volume_id = %self.id, status = %other, "Unrecognised block status");
                VolumeStatus::Error
            }
        };

        Volume {
            id: self.id,
            label: self.label,
            size_gb: self.size_gb,
            region: self.region,
            status,
            attached_to,
            mount_id: self.mount_id,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// What a 404 means for the request being made.
#[derive(Debug, Clone, Copy)]
enum Missing<'a> {
    Volume(&'a str),
    Instance(&'a str),
    Nothing,
}

impl Missing<'_> {
    fn into_error(self, message: String) -> BackendError {
        match self {
            Missing::Volume(id) => BackendError::VolumeNotFound(id.to_string()),
            Missing::Instance(id) => BackendError::InstanceNotFound(id.to_string()),
            Missing::Nothing => BackendError::Rejected {
                status: StatusCode::NOT_FOUND.as_u16(),
                message,
            },
        }
    }
}

/// Client for the Vultr block storage API.
#[derive(Debug, Clone)]
pub struct VultrClient {
    http: Client,
    base_url: String,
}

impl VultrClient {
    /// Build a client authenticated with `token`, bounding every request by `timeout`.
    pub fn new(base_url: &str, token: &str, version: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| BackendError::InvalidResponse("API token is not a valid header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .user_agent(format!("csi-vultr/{}", version))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::InvalidResponse(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2{}", self.base_url, path)
    }

    /// Send a request and turn transport failures and error statuses into
    /// [`BackendError`] kinds.
    async fn send(&self, request: RequestBuilder, missing: Missing<'_>) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            debug!(error = %e, "Provider request failed");
            if e.is_timeout() || e.is_connect() || e.is_request() {
                BackendError::Transient(e.to_string())
            } else {
                BackendError::InvalidResponse(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_default();

        Err(match status {
            StatusCode::NOT_FOUND => missing.into_error(message),
            StatusCode::TOO_MANY_REQUESTS => BackendError::Transient(format!("rate limited: {}", message)),
            s if s.is_server_error() => BackendError::Transient(format!("{}: {}", s, message)),
            s => BackendError::Rejected {
                status: s.as_u16(),
                message,
            },
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

#[tonic::async_trait]
impl VolumeBackend for VultrClient {
    async fn create_volume(&self, region: &str, size_gb: u64, label: &str) -> Result<Volume> {
        debug!(region = %region, size_gb, label = %label, "POST /blocks");
        let request = self.http.post(self.url("/blocks")).json(&CreateBlockRequest {
            region,
            size_gb,
            label,
        });
        let response = self.send(request, Missing::Nothing).await?;
        let envelope: BlockEnvelope = Self::decode(response).await?;
        Ok(envelope.block.into_volume())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id = %volume_id, "DELETE /blocks/{{id}}");
        let request = self.http.delete(self.url(&format!("/blocks/{}", volume_id)));
        self.send(request, Missing::Volume(volume_id)).await?;
        Ok(())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        let request = self.http.get(self.url(&format!("/blocks/{}", volume_id)));
        let response = self.send(request, Missing::Volume(volume_id)).await?;
        let envelope: BlockEnvelope = Self::decode(response).await?;
        Ok(envelope.block.into_volume())
    }

    async fn list_volumes(&self, cursor: Option<&str>, per_page: u32) -> Result<VolumePage> {
        let mut query: Vec<(&str, String)> = vec![("per_page", per_page.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let request = self.http.get(self.url("/blocks")).query(&query);
        let response = match self.send(request, Missing::Nothing).await {
            // The API answers a stale or forged cursor with a client error.
            Err(BackendError::Rejected { .. }) if cursor.is_some() => {
                return Err(BackendError::InvalidCursor(cursor.unwrap_or_default().to_string()));
            }
            other => other?,
        };
        let envelope: BlocksEnvelope = Self::decode(response).await?;

        let next = envelope.meta.links.next;
        Ok(VolumePage {
            volumes: envelope.blocks.into_iter().map(Block::into_volume).collect(),
            next_cursor: (!next.is_empty()).then_some(next),
        })
    }

    async fn attach_volume(&self, volume_id: &str, node_id: &str) -> Result<()> {
        debug!(volume_id = %volume_id, node_id = %node_id, "POST /blocks/{{id}}/attach");
        let request = self
            .http
            .post(self.url(&format!("/blocks/{}/attach", volume_id)))
            .json(&AttachBlockRequest {
                instance_id: node_id,
                live: true,
            });
        self.send(request, Missing::Volume(volume_id)).await?;
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        debug!(volume_id = %volume_id, "POST /blocks/{{id}}/detach");
        // The API refuses to detach an unattached block; check first so the
        // call stays idempotent.
        let volume = self.get_volume(volume_id).await?;
        if volume.attached_to.is_none() {
            return Ok(());
        }

        let request = self
            .http
            .post(self.url(&format!("/blocks/{}/detach", volume_id)))
            .json(&DetachBlockRequest { live: true });
        self.send(request, Missing::Volume(volume_id)).await?;
        Ok(())
    }

    async fn resize_volume(&self, volume_id: &str, size_gb: u64) -> Result<()> {
        debug!(volume_id = %volume_id, size_gb, "PATCH /blocks/{{id}}");
        let request = self
            .http
            .patch(self.url(&format!("/blocks/{}", volume_id)))
            .json(&UpdateBlockRequest { size_gb });
        self.send(request, Missing::Volume(volume_id)).await?;
        Ok(())
    }

    async fn get_instance(&self, node_id: &str) -> Result<Instance> {
        let request = self.http.get(self.url(&format!("/instances/{}", node_id)));
        let response = self.send(request, Missing::Instance(node_id)).await?;
        let envelope: InstanceEnvelope = Self::decode(response).await?;
        Ok(Instance {
            id: envelope.instance.id,
            region: envelope.instance.region,
        })
    }

    async fn region_capacity(&self, region: &str) -> Result<RegionCapacity> {
        let request = self
            .http
            .get(self.url("/regions"))
            .query(&[("per_page", REGION_PAGE_SIZE.to_string())]);
        let response = self.send(request, Missing::Nothing).await?;
        let envelope: RegionsEnvelope = Self::decode(response).await?;

        // The API exposes no pool size; a region offering block storage can
        // always provision one more maximum-size volume.
        let offers_block_storage = envelope.regions.iter().any(|r| {
            r.id == region
                && r.options
                    .iter()
                    .any(|o| o.starts_with(BLOCK_STORAGE_OPTION_PREFIX))
        });
        let maximum_volume_bytes = MAX_VOLUME_SIZE_GB as i64 * GIB;

        Ok(RegionCapacity {
            available_bytes: if offers_block_storage {
                maximum_volume_bytes
            } else {
                0
            },
            minimum_volume_bytes: MIN_VOLUME_SIZE_GB as i64 * GIB,
            maximum_volume_bytes,
        })
    }
}
