//! Integration tests for vultr-csi
//!
//! These tests drive the Controller and Node services together through
//! their tonic traits, with the in-memory backend standing in for the Vultr
//! API and the fake mounter standing in for the host.
//! Tests focus on:
//! - Idempotent create, delete, publish and unpublish
//! - Per-volume locking under concurrent calls
//! - Poll deadlines and shutdown during polling
//! - Staging safety (no reformatting, no foreign filesystems)
//! - The full lifecycle of one volume
//! - The gRPC server over TCP

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tonic::{Code, Request};

use vultr_csi::csi;
use vultr_csi::csi::controller_server::Controller;
use vultr_csi::csi::node_server::Node;
use vultr_csi::csi::volume_capability::access_mode::Mode;
use vultr_csi::mounter::FakeAction;
use vultr_csi::types::{GIB, PUBLISH_CONTEXT_DEVICE_PATH};
use vultr_csi::{
    ControllerService, DriverConfig, FakeMounter, IdentityService, InMemoryBackend,
    NodeService, NonBlockingServer,
};

const NODE_1: &str = "node-1";
const NODE_2: &str = "node-2";
const REGION: &str = "ewr";
const KERNEL_DEVICE: &str = "/dev/vdb";

// ============================================================================
// Harness
// ============================================================================

struct Cluster {
    backend: Arc<InMemoryBackend>,
    mounter: Arc<FakeMounter>,
    controller: ControllerService,
    node: NodeService,
    shutdown: CancellationToken,
}

impl Cluster {
    fn new() -> Self {
        Self::with_backend(
            InMemoryBackend::new()
                .with_instance(NODE_1, REGION)
                .with_instance(NODE_2, REGION),
            Duration::from_secs(5),
        )
    }

    fn with_backend(backend: InMemoryBackend, timeout: Duration) -> Self {
        let backend = Arc::new(backend);
        let mounter = Arc::new(FakeMounter::new());
        let shutdown = CancellationToken::new();
        let config = Arc::new(
            DriverConfig::new(NODE_1, REGION)
                .with_timeout(timeout)
                .with_poll_interval(Duration::from_millis(10))
                .with_device_wait(Duration::from_secs(1)),
        );
        Self {
            controller: ControllerService::new(config.clone(), backend.clone(), shutdown.clone()),
            node: NodeService::new(config, mounter.clone()),
            backend,
            mounter,
            shutdown,
        }
    }

    async fn create(&self, name: &str, gib: i64) -> Result<csi::Volume, tonic::Status> {
        self.controller
            .create_volume(Request::new(create_request(name, gib)))
            .await
            .map(|r| r.into_inner().volume.expect("volume in response"))
    }

    async fn publish(
        &self,
        volume_id: &str,
        node_id: &str,
    ) -> Result<HashMap<String, String>, tonic::Status> {
        self.controller
            .controller_publish_volume(Request::new(publish_request(volume_id, node_id)))
            .await
            .map(|r| r.into_inner().publish_context)
    }

    async fn unpublish(&self, volume_id: &str, node_id: &str) -> Result<(), tonic::Status> {
        self.controller
            .controller_unpublish_volume(Request::new(csi::ControllerUnpublishVolumeRequest {
                volume_id: volume_id.to_string(),
                node_id: node_id.to_string(),
                ..Default::default()
            }))
            .await
            .map(|_| ())
    }

    async fn delete(&self, volume_id: &str) -> Result<(), tonic::Status> {
        self.controller
            .delete_volume(Request::new(csi::DeleteVolumeRequest {
                volume_id: volume_id.to_string(),
                ..Default::default()
            }))
            .await
            .map(|_| ())
    }

    /// Make the attached disk visible to the node, as the kernel would.
    fn plug_disk(&self, publish_context: &HashMap<String, String>, gib: u64) {
        self.mounter.add_device(
            &publish_context[PUBLISH_CONTEXT_DEVICE_PATH],
            KERNEL_DEVICE,
            gib * GIB as u64,
        );
    }
}

fn mount_capability(fs_type: &str, mode: Mode) -> csi::VolumeCapability {
    csi::VolumeCapability {
        access_type: Some(csi::volume_capability::AccessType::Mount(
            csi::volume_capability::MountVolume {
                fs_type: fs_type.to_string(),
                ..Default::default()
            },
        )),
        access_mode: Some(csi::volume_capability::AccessMode { mode: mode as i32 }),
    }
}

fn create_request(name: &str, gib: i64) -> csi::CreateVolumeRequest {
    csi::CreateVolumeRequest {
        name: name.to_string(),
        capacity_range: Some(csi::CapacityRange {
            required_bytes: gib * GIB,
            limit_bytes: 0,
        }),
        volume_capabilities: vec![mount_capability("ext4", Mode::SingleNodeWriter)],
        ..Default::default()
    }
}

fn publish_request(volume_id: &str, node_id: &str) -> csi::ControllerPublishVolumeRequest {
    csi::ControllerPublishVolumeRequest {
        volume_id: volume_id.to_string(),
        node_id: node_id.to_string(),
        volume_capability: Some(mount_capability("ext4", Mode::SingleNodeWriter)),
        ..Default::default()
    }
}

fn stage_request(
    volume_id: &str,
    publish_context: &HashMap<String, String>,
    staging: &str,
    fs_type: &str,
) -> csi::NodeStageVolumeRequest {
    csi::NodeStageVolumeRequest {
        volume_id: volume_id.to_string(),
        publish_context: publish_context.clone(),
        staging_target_path: staging.to_string(),
        volume_capability: Some(mount_capability(fs_type, Mode::SingleNodeWriter)),
        ..Default::default()
    }
}

fn node_publish_request(
    volume_id: &str,
    staging: &str,
    target: &str,
) -> csi::NodePublishVolumeRequest {
    csi::NodePublishVolumeRequest {
        volume_id: volume_id.to_string(),
        staging_target_path: staging.to_string(),
        target_path: target.to_string(),
        volume_capability: Some(mount_capability("ext4", Mode::SingleNodeWriter)),
        ..Default::default()
    }
}

// ============================================================================
// Controller: create and delete
// ============================================================================

#[tokio::test]
async fn test_create_volume_replay_returns_same_volume() {
    let cluster = Cluster::new();

    let first = cluster.create("pvc-a", 10).await.unwrap();
    let second = cluster.create("pvc-a", 10).await.unwrap();

    assert_eq!(first.volume_id, second.volume_id);
    assert_eq!(cluster.backend.create_calls(), 1);
    assert_eq!(cluster.backend.volume_count(), 1);
}

#[tokio::test]
async fn test_create_volume_conflicting_size_is_already_exists() {
    let cluster = Cluster::new();
    cluster.create("pvc-a", 10).await.unwrap();

    let err = cluster.create("pvc-a", 20).await.unwrap_err();

    assert_eq!(err.code(), Code::AlreadyExists);
    assert_eq!(cluster.backend.create_calls(), 1);
    assert_eq!(cluster.backend.volume_count(), 1);
}

#[tokio::test]
async fn test_create_volume_never_under_provisions() {
    let cluster = Cluster::new();

    let volume = cluster
        .controller
        .create_volume(Request::new(csi::CreateVolumeRequest {
            capacity_range: Some(csi::CapacityRange {
                required_bytes: 12 * GIB + 1,
                limit_bytes: 0,
            }),
            ..create_request("pvc-odd", 0)
        }))
        .await
        .unwrap()
        .into_inner()
        .volume
        .unwrap();

    assert_eq!(volume.capacity_bytes, 13 * GIB);
}

#[tokio::test]
async fn test_create_volume_waits_for_provisioning() {
    let cluster = Cluster::with_backend(
        InMemoryBackend::new()
            .with_instance(NODE_1, REGION)
            .with_settle_reads(3),
        Duration::from_secs(5),
    );

    let volume = cluster.create("pvc-slow", 10).await.unwrap();

    let stored = cluster.backend.volume(&volume.volume_id).unwrap();
    assert!(stored.status.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_create_volume_timeout_then_retry_does_not_duplicate() {
    let cluster = Cluster::with_backend(
        InMemoryBackend::new().with_instance(NODE_1, REGION),
        Duration::from_millis(200),
    );
    cluster.backend.set_never_settle(true);

    let err = cluster.create("pvc-stuck", 10).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(cluster.backend.create_calls(), 1);

    // The provider finishes later; the retry finds the volume by name.
    cluster.backend.set_never_settle(false);
    let volume = cluster.create("pvc-stuck", 10).await.unwrap();

    assert_eq!(cluster.backend.create_calls(), 1);
    assert!(cluster.backend.volume(&volume.volume_id).unwrap().status.is_ready());
}

#[tokio::test]
async fn test_delete_unknown_volume_succeeds() {
    let cluster = Cluster::new();
    cluster.delete("does-not-exist").await.unwrap();
    assert_eq!(cluster.backend.delete_calls(), 0);
}

#[tokio::test]
async fn test_delete_attached_volume_is_refused() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    cluster.publish(&volume.volume_id, NODE_1).await.unwrap();

    let err = cluster.delete(&volume.volume_id).await.unwrap_err();

    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(cluster.backend.volume(&volume.volume_id).is_some());
    assert_eq!(
        cluster.backend.attachment(&volume.volume_id).as_deref(),
        Some(NODE_1)
    );
}

// ============================================================================
// Controller: publish and unpublish
// ============================================================================

#[tokio::test]
async fn test_publish_is_idempotent() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();

    let first = cluster.publish(&volume.volume_id, NODE_1).await.unwrap();
    let second = cluster.publish(&volume.volume_id, NODE_1).await.unwrap();

    assert_eq!(first, second);
    assert!(first[PUBLISH_CONTEXT_DEVICE_PATH].starts_with("/dev/disk/by-id/virtio-"));
    assert_eq!(cluster.backend.attach_calls(), 1);
    assert_eq!(
        cluster.backend.attachment(&volume.volume_id).as_deref(),
        Some(NODE_1)
    );
}

#[tokio::test]
async fn test_publish_to_second_node_is_refused() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    cluster.publish(&volume.volume_id, NODE_1).await.unwrap();

    let err = cluster.publish(&volume.volume_id, NODE_2).await.unwrap_err();

    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(
        cluster.backend.attachment(&volume.volume_id).as_deref(),
        Some(NODE_1)
    );
}

#[tokio::test]
async fn test_publish_unknown_volume_or_node_is_not_found() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();

    let err = cluster.publish("no-such-volume", NODE_1).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let err = cluster
        .publish(&volume.volume_id, "no-such-node")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(cluster.backend.attach_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_publish_never_overlaps_attach_calls() {
    let cluster = Cluster::with_backend(
        InMemoryBackend::new()
            .with_instance(NODE_1, REGION)
            .with_call_latency(Duration::from_millis(50)),
        Duration::from_secs(5),
    );
    let volume = cluster.create("pvc-a", 10).await.unwrap();

    let (a, b) = tokio::join!(
        cluster.publish(&volume.volume_id, NODE_1),
        cluster.publish(&volume.volume_id, NODE_1),
    );

    let outcomes = [a, b];
    assert!(outcomes.iter().any(|r| r.is_ok()));
    for outcome in &outcomes {
        if let Err(status) = outcome {
            assert_eq!(status.code(), Code::Aborted);
        }
    }
    assert!(cluster.backend.max_concurrent_attach() <= 1);
    assert_eq!(
        cluster.backend.attachment(&volume.volume_id).as_deref(),
        Some(NODE_1)
    );
}

#[tokio::test(start_paused = true)]
async fn test_attach_deadline_leaves_no_attachment() {
    let cluster = Cluster::with_backend(
        InMemoryBackend::new().with_instance(NODE_1, REGION),
        Duration::from_millis(300),
    );
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    cluster.backend.set_never_settle(true);

    let err = cluster.publish(&volume.volume_id, NODE_1).await.unwrap_err();

    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(cluster.backend.attachment(&volume.volume_id), None);
    assert!(!cluster.backend.has_pending_operation(&volume.volume_id));
}

#[tokio::test(start_paused = true)]
async fn test_caller_deadline_shortens_poll() {
    let cluster = Cluster::with_backend(
        InMemoryBackend::new().with_instance(NODE_1, REGION),
        Duration::from_secs(60),
    );
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    cluster.backend.set_never_settle(true);

    let mut request = Request::new(publish_request(&volume.volume_id, NODE_1));
    request
        .metadata_mut()
        .insert("grpc-timeout", "100m".parse().unwrap());

    let started = tokio::time::Instant::now();
    let err = cluster
        .controller
        .controller_publish_volume(request)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::Unavailable);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_poll_aborts() {
    let cluster = Cluster::with_backend(
        InMemoryBackend::new().with_instance(NODE_1, REGION),
        Duration::from_secs(60),
    );
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    cluster.backend.set_never_settle(true);

    let shutdown = cluster.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    });

    let err = cluster.publish(&volume.volume_id, NODE_1).await.unwrap_err();

    assert_eq!(err.code(), Code::Aborted);
    assert_eq!(cluster.backend.attachment(&volume.volume_id), None);
}

#[tokio::test]
async fn test_unpublish_is_idempotent() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    cluster.publish(&volume.volume_id, NODE_1).await.unwrap();

    // Attached elsewhere: nothing to do
    cluster.unpublish(&volume.volume_id, NODE_2).await.unwrap();
    assert_eq!(
        cluster.backend.attachment(&volume.volume_id).as_deref(),
        Some(NODE_1)
    );

    cluster.unpublish(&volume.volume_id, NODE_1).await.unwrap();
    cluster.unpublish(&volume.volume_id, NODE_1).await.unwrap();
    cluster.unpublish("no-such-volume", NODE_1).await.unwrap();

    assert_eq!(cluster.backend.attachment(&volume.volume_id), None);
    assert_eq!(cluster.backend.detach_calls(), 1);
}

#[tokio::test]
async fn test_list_volumes_reports_published_nodes() {
    let cluster = Cluster::new();
    let attached = cluster.create("pvc-a", 10).await.unwrap();
    cluster.create("pvc-b", 10).await.unwrap();
    cluster.publish(&attached.volume_id, NODE_1).await.unwrap();

    let entries = cluster
        .controller
        .list_volumes(Request::new(csi::ListVolumesRequest::default()))
        .await
        .unwrap()
        .into_inner()
        .entries;

    assert_eq!(entries.len(), 2);
    let published: HashMap<String, Vec<String>> = entries
        .into_iter()
        .map(|e| {
            (
                e.volume.unwrap().volume_id,
                e.status.unwrap().published_node_ids,
            )
        })
        .collect();
    assert_eq!(published[&attached.volume_id], vec![NODE_1.to_string()]);
}

#[tokio::test]
async fn test_validate_volume_capabilities() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();

    let validate = |mode: Mode| csi::ValidateVolumeCapabilitiesRequest {
        volume_id: volume.volume_id.clone(),
        volume_capabilities: vec![mount_capability("ext4", mode)],
        ..Default::default()
    };

    let supported = cluster
        .controller
        .validate_volume_capabilities(Request::new(validate(Mode::SingleNodeWriter)))
        .await
        .unwrap()
        .into_inner();
    assert!(supported.confirmed.is_some());

    let unsupported = cluster
        .controller
        .validate_volume_capabilities(Request::new(validate(Mode::MultiNodeMultiWriter)))
        .await
        .unwrap()
        .into_inner();
    assert!(unsupported.confirmed.is_none());
    assert!(!unsupported.message.is_empty());
}

// ============================================================================
// Node
// ============================================================================

#[tokio::test]
async fn test_stage_twice_formats_once() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    let context = cluster.publish(&volume.volume_id, NODE_1).await.unwrap();
    cluster.plug_disk(&context, 10);

    for _ in 0..2 {
        cluster
            .node
            .node_stage_volume(Request::new(stage_request(
                &volume.volume_id,
                &context,
                "/stage/a",
                "ext4",
            )))
            .await
            .unwrap();
    }

    assert_eq!(cluster.mounter.format_count(), 1);
    assert_eq!(cluster.mounter.mount_table().len(), 1);
}

#[tokio::test]
async fn test_stage_never_formats_foreign_filesystem() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    let context = cluster.publish(&volume.volume_id, NODE_1).await.unwrap();
    cluster.plug_disk(&context, 10);
    // Someone else's data on the disk
    cluster.mounter.set_signature(KERNEL_DEVICE, "btrfs");

    let err = cluster
        .node
        .node_stage_volume(Request::new(stage_request(
            &volume.volume_id,
            &context,
            "/stage/a",
            "ext4",
        )))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::FailedPrecondition);
    assert_eq!(cluster.mounter.format_count(), 0);
    assert_eq!(
        cluster.mounter.signature(KERNEL_DEVICE).as_deref(),
        Some("btrfs")
    );
    assert!(cluster.mounter.mount_table().is_empty());
}

#[tokio::test]
async fn test_unmount_of_unmounted_paths_succeeds() {
    let cluster = Cluster::new();

    cluster
        .node
        .node_unpublish_volume(Request::new(csi::NodeUnpublishVolumeRequest {
            volume_id: "vol-x".to_string(),
            target_path: "/target/never-mounted".to_string(),
        }))
        .await
        .unwrap();
    cluster
        .node
        .node_unstage_volume(Request::new(csi::NodeUnstageVolumeRequest {
            volume_id: "vol-x".to_string(),
            staging_target_path: "/stage/never-mounted".to_string(),
        }))
        .await
        .unwrap();

    assert!(cluster.mounter.actions().is_empty());
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_volume_lifecycle() {
    let cluster = Cluster::new();

    // CreateVolume("vol-a", 10 GiB)
    let volume = cluster.create("vol-a", 10).await.unwrap();
    let volume_id = volume.volume_id.clone();
    assert_eq!(volume.capacity_bytes, 10 * GIB);

    // ControllerPublishVolume(X, node-1)
    let context = cluster.publish(&volume_id, NODE_1).await.unwrap();
    cluster.plug_disk(&context, 10);

    // NodeStageVolume: formats and mounts
    let staging = format!("/stage/{}", volume_id);
    cluster
        .node
        .node_stage_volume(Request::new(stage_request(
            &volume_id, &context, &staging, "ext4",
        )))
        .await
        .unwrap();

    // NodePublishVolume: bind mount
    cluster
        .node
        .node_publish_volume(Request::new(node_publish_request(
            &volume_id,
            &staging,
            "/target/pod1",
        )))
        .await
        .unwrap();

    let table = cluster.mounter.mount_table();
    assert_eq!(table.len(), 2);
    assert!(table.iter().all(|m| m.device == KERNEL_DEVICE));

    // Teardown in reverse order
    cluster
        .node
        .node_unpublish_volume(Request::new(csi::NodeUnpublishVolumeRequest {
            volume_id: volume_id.clone(),
            target_path: "/target/pod1".to_string(),
        }))
        .await
        .unwrap();
    cluster
        .node
        .node_unstage_volume(Request::new(csi::NodeUnstageVolumeRequest {
            volume_id: volume_id.clone(),
            staging_target_path: staging.clone(),
        }))
        .await
        .unwrap();
    cluster.unpublish(&volume_id, NODE_1).await.unwrap();
    cluster.delete(&volume_id).await.unwrap();

    assert!(cluster.mounter.mount_table().is_empty());
    assert_eq!(cluster.backend.volume(&volume_id), None);
    assert_eq!(cluster.backend.volume_count(), 0);

    let actions = cluster.mounter.actions();
    assert_eq!(
        actions.first(),
        Some(&FakeAction::Format {
            device: KERNEL_DEVICE.to_string(),
            fs_type: vultr_csi::types::FsType::Ext4,
        })
    );
    assert_eq!(
        actions.last(),
        Some(&FakeAction::Unmount {
            target: staging.clone(),
        })
    );
}

#[tokio::test]
async fn test_expand_controller_then_node() {
    let cluster = Cluster::new();
    let volume = cluster.create("pvc-a", 10).await.unwrap();
    let context = cluster.publish(&volume.volume_id, NODE_1).await.unwrap();
    cluster.plug_disk(&context, 10);
    cluster
        .node
        .node_stage_volume(Request::new(stage_request(
            &volume.volume_id,
            &context,
            "/stage/a",
            "xfs",
        )))
        .await
        .unwrap();

    let expanded = cluster
        .controller
        .controller_expand_volume(Request::new(csi::ControllerExpandVolumeRequest {
            volume_id: volume.volume_id.clone(),
            capacity_range: Some(csi::CapacityRange {
                required_bytes: 40 * GIB,
                limit_bytes: 0,
            }),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(expanded.node_expansion_required);
    assert_eq!(cluster.backend.volume(&volume.volume_id).unwrap().size_gb, 40);

    // The guest sees the larger disk
    cluster.mounter.set_device_size(KERNEL_DEVICE, 40 * GIB as u64);

    let grown = cluster
        .node
        .node_expand_volume(Request::new(csi::NodeExpandVolumeRequest {
            volume_id: volume.volume_id.clone(),
            volume_path: "/stage/a".to_string(),
            capacity_range: Some(csi::CapacityRange {
                required_bytes: expanded.capacity_bytes,
                limit_bytes: 0,
            }),
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(grown.capacity_bytes, 40 * GIB);
    assert!(cluster
        .mounter
        .actions()
        .contains(&FakeAction::Resize {
            device: KERNEL_DEVICE.to_string()
        }));
}

// ============================================================================
// gRPC server
// ============================================================================

#[tokio::test]
async fn test_server_over_tcp() {
    use csi::controller_client::ControllerClient;
    use csi::identity_client::IdentityClient;
    use csi::node_client::NodeClient;

    let backend = Arc::new(InMemoryBackend::new().with_instance(NODE_1, REGION));
    let shutdown = CancellationToken::new();
    let config = Arc::new(
        DriverConfig::new(NODE_1, REGION).with_poll_interval(Duration::from_millis(10)),
    );

    let server = NonBlockingServer::start(
        "tcp://127.0.0.1:0",
        IdentityService::new(config.clone(), shutdown.clone()),
        Some(ControllerService::new(
            config.clone(),
            backend.clone(),
            shutdown.clone(),
        )),
        Some(NodeService::new(config, Arc::new(FakeMounter::new()))),
        shutdown.clone(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let url = format!("http://{}", addr);

    let mut identity = IdentityClient::connect(url.clone()).await.unwrap();
    let probe = identity
        .probe(csi::ProbeRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(probe.ready, Some(true));

    let mut controller = ControllerClient::connect(url.clone()).await.unwrap();
    let volume = controller
        .create_volume(create_request("pvc-wire", 10))
        .await
        .unwrap()
        .into_inner()
        .volume
        .unwrap();
    let err = controller
        .create_volume(create_request("pvc-wire", 30))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);
    assert_eq!(backend.volume_count(), 1);
    assert_eq!(backend.volume(&volume.volume_id).unwrap().label, "pvc-wire");

    let mut node = NodeClient::connect(url).await.unwrap();
    let info = node
        .node_get_info(csi::NodeGetInfoRequest {})
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.node_id, NODE_1);

    drop(identity);
    drop(controller);
    drop(node);
    server.shutdown();
    server.wait().await.unwrap();
}
