//! In-memory block storage backend.
//!
//! Implements the full [`VolumeBackend`] contract without a provider: ids are
//! unique, unknown ids and instances are `NotFound`, a volume attaches to at
//! most one instance, and asynchronous effects (provisioning, attach, detach)
//! only become visible after a configurable number of `get_volume` reads, the
//! way the real API settles. Tests use the inspection helpers to assert on
//! what the backend actually received.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use super::{
    BackendError, Instance, RegionCapacity, Result, Volume, VolumeBackend, VolumePage,
    VolumeStatus,
};
use crate::types::{GIB, MAX_VOLUME_SIZE_GB, MIN_VOLUME_SIZE_GB};

/// Capacity reported for every region unless overridden.
const DEFAULT_REGION_CAPACITY_BYTES: i64 = 100 * 1024 * GIB;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingOp {
    Provision,
    Attach(String),
    Detach,
}

#[derive(Debug, Clone)]
struct Pending {
    op: PendingOp,
    reads_left: u32,
}

#[derive(Debug, Clone)]
struct StoredVolume {
    volume: Volume,
    pending: Option<Pending>,
}

impl StoredVolume {
    fn apply_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match pending.op {
            PendingOp::Provision => self.volume.status = VolumeStatus::Available,
            PendingOp::Attach(node_id) => {
                self.volume.attached_to = Some(node_id);
                self.volume.status = VolumeStatus::Attached;
            }
            PendingOp::Detach => {
                self.volume.attached_to = None;
                self.volume.status = VolumeStatus::Detached;
            }
        }
    }

    fn pending_attach_target(&self) -> Option<&str> {
        match &self.pending {
            Some(Pending {
                op: PendingOp::Attach(node_id),
                ..
            }) => Some(node_id),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Calls {
    create: u32,
    delete: u32,
    attach: u32,
    detach: u32,
    resize: u32,
}

#[derive(Debug, Default)]
struct State {
    /// Creation order doubles as the listing order.
    volumes: Vec<StoredVolume>,
    instances: HashMap<String, Instance>,
    settle_reads: u32,
    never_settle: bool,
    failing_reads: u32,
    capacity_bytes: Option<i64>,
    calls: Calls,
    attach_in_flight: HashMap<String, u32>,
    max_concurrent_attach: u32,
}

impl State {
    fn find(&self, volume_id: &str) -> Option<usize> {
        self.volumes.iter().position(|v| v.volume.id == volume_id)
    }

    fn schedule(&mut self, idx: usize, op: PendingOp) {
        let reads_left = self.settle_reads;
        let never_settle = self.never_settle;
        let stored = &mut self.volumes[idx];
        stored.pending = Some(Pending { op, reads_left });
        if reads_left == 0 && !never_settle {
            stored.apply_pending();
        }
    }
}

/// Block storage backend held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    call_latency: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance volumes can attach to.
    pub fn with_instance(self, node_id: &str, region: &str) -> Self {
        self.state().instances.insert(
            node_id.to_string(),
            Instance {
                id: node_id.to_string(),
                region: region.to_string(),
            },
        );
        self
    }

    /// Number of `get_volume` reads before a create/attach/detach is visible.
    pub fn with_settle_reads(self, reads: u32) -> Self {
        self.state().settle_reads = reads;
        self
    }

    /// Delay applied inside every attach call, to widen race windows.
    pub fn with_call_latency(mut self, latency: Duration) -> Self {
        self.call_latency = latency;
        self
    }

    /// Capacity reported by `region_capacity`.
    pub fn with_capacity(self, available_bytes: i64) -> Self {
        self.state().capacity_bytes = Some(available_bytes);
        self
    }

    /// Stop (or resume) settling asynchronous operations.
    pub fn set_never_settle(&self, never_settle: bool) {
        self.state().never_settle = never_settle;
    }

    /// Make the next `count` `get_volume` calls fail transiently.
    pub fn fail_next_reads(&self, count: u32) {
        self.state().failing_reads = count;
    }

    /// Seed a volume directly, already settled.
    pub fn insert_volume(&self, volume: Volume) {
        self.state().volumes.push(StoredVolume {
            volume,
            pending: None,
        });
    }

    /// Settled state of a volume, ignoring anything still pending.
    pub fn volume(&self, volume_id: &str) -> Option<Volume> {
        let state = self.state();
        state.find(volume_id).map(|idx| state.volumes[idx].volume.clone())
    }

    /// Instance a volume is attached to, ignoring anything still pending.
    pub fn attachment(&self, volume_id: &str) -> Option<String> {
        self.volume(volume_id).and_then(|v| v.attached_to)
    }

    /// Whether an attach or detach is still waiting to settle.
    pub fn has_pending_operation(&self, volume_id: &str) -> bool {
        let state = self.state();
        state
            .find(volume_id)
            .is_some_and(|idx| state.volumes[idx].pending.is_some())
    }

    pub fn volume_count(&self) -> usize {
        self.state().volumes.len()
    }

    pub fn create_calls(&self) -> u32 {
        self.state().calls.create
    }

    pub fn delete_calls(&self) -> u32 {
        self.state().calls.delete
    }

    pub fn attach_calls(&self) -> u32 {
        self.state().calls.attach
    }

    pub fn detach_calls(&self) -> u32 {
        self.state().calls.detach
    }

    pub fn resize_calls(&self) -> u32 {
        self.state().calls.resize
    }

    /// Highest number of attach calls ever in flight for a single volume.
    pub fn max_concurrent_attach(&self) -> u32 {
        self.state().max_concurrent_attach
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_volume(region: &str, size_gb: u64, label: &str) -> Volume {
        let id = Uuid::new_v4().to_string();
        let serial: String = id.replace('-', "").chars().take(14).collect();
        Volume {
            id,
            label: label.to_string(),
            size_gb,
            region: region.to_string(),
            status: VolumeStatus::Creating,
            attached_to: None,
            mount_id: format!("{}-{}", region, serial),
        }
    }

    fn attach_locked(state: &mut State, volume_id: &str, node_id: &str) -> Result<()> {
        let idx = state
            .find(volume_id)
            .ok_or_else(|| BackendError::VolumeNotFound(volume_id.to_string()))?;
        if !state.instances.contains_key(node_id) {
            return Err(BackendError::InstanceNotFound(node_id.to_string()));
        }

        let stored = &state.volumes[idx];
        if !stored.volume.status.is_ready() {
            return Err(BackendError::Rejected {
                status: 409,
                message: format!("volume is {}", stored.volume.status),
            });
        }

        let current = stored
            .volume
            .attached_to
            .as_deref()
            .or(stored.pending_attach_target())
            .map(str::to_string);
        match current {
            Some(existing) if existing == node_id => {
                // Re-attaching to the same instance cancels a detach in flight.
                let stored = &mut state.volumes[idx];
                if matches!(
                    stored.pending,
                    Some(Pending {
                        op: PendingOp::Detach,
                        ..
                    })
                ) {
                    stored.pending = None;
                }
                Ok(())
            }
            Some(existing) => Err(BackendError::AlreadyAttached {
                volume_id: volume_id.to_string(),
                node_id: existing,
            }),
            None => {
                state.schedule(idx, PendingOp::Attach(node_id.to_string()));
                Ok(())
            }
        }
    }
}

#[tonic::async_trait]
impl VolumeBackend for InMemoryBackend {
    async fn create_volume(&self, region: &str, size_gb: u64, label: &str) -> Result<Volume> {
        if !(MIN_VOLUME_SIZE_GB..=MAX_VOLUME_SIZE_GB).contains(&size_gb) {
            return Err(BackendError::Rejected {
                status: 400,
                message: format!("invalid size {}GB", size_gb),
            });
        }

        let mut state = self.state();
        state.calls.create += 1;

        let volume = Self::new_volume(region, size_gb, label);
        debug!(volume_id = %volume.id, label = %label, "in-memory create");
        state.volumes.push(StoredVolume {
            volume: volume.clone(),
            pending: None,
        });
        let idx = state.volumes.len() - 1;
        state.schedule(idx, PendingOp::Provision);

        Ok(volume)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.delete += 1;

        let idx = state
            .find(volume_id)
            .ok_or_else(|| BackendError::VolumeNotFound(volume_id.to_string()))?;
        if state.volumes[idx].volume.attached_to.is_some() {
            return Err(BackendError::Rejected {
                status: 409,
                message: "volume is attached".to_string(),
            });
        }

        state.volumes.remove(idx);
        Ok(())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume> {
        let mut state = self.state();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(BackendError::Transient("injected read failure".to_string()));
        }

        let never_settle = state.never_settle;
        let idx = state
            .find(volume_id)
            .ok_or_else(|| BackendError::VolumeNotFound(volume_id.to_string()))?;
        let stored = &mut state.volumes[idx];

        if !never_settle {
            let settle_now = match stored.pending.as_mut() {
                Some(pending) if pending.reads_left == 0 => true,
                Some(pending) => {
                    pending.reads_left -= 1;
                    false
                }
                None => false,
            };
            if settle_now {
                stored.apply_pending();
            }
        }

        Ok(stored.volume.clone())
    }

    async fn list_volumes(&self, cursor: Option<&str>, per_page: u32) -> Result<VolumePage> {
        let state = self.state();
        let start = match cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .ok()
                .filter(|&i| i <= state.volumes.len())
                .ok_or_else(|| BackendError::InvalidCursor(c.to_string()))?,
        };
        let per_page = per_page.max(1) as usize;
        let end = (start + per_page).min(state.volumes.len());

        let volumes = state.volumes[start..end]
            .iter()
            .map(|s| s.volume.clone())
            .collect();
        let next_cursor = (end < state.volumes.len()).then(|| end.to_string());

        Ok(VolumePage {
            volumes,
            next_cursor,
        })
    }

    async fn attach_volume(&self, volume_id: &str, node_id: &str) -> Result<()> {
        {
            let mut state = self.state();
            state.calls.attach += 1;
            let in_flight = state
                .attach_in_flight
                .entry(volume_id.to_string())
                .or_default();
            *in_flight += 1;
            let current = *in_flight;
            state.max_concurrent_attach = state.max_concurrent_attach.max(current);
        }

        if !self.call_latency.is_zero() {
            tokio::time::sleep(self.call_latency).await;
        }

        let mut state = self.state();
        if let Some(in_flight) = state.attach_in_flight.get_mut(volume_id) {
            *in_flight = in_flight.saturating_sub(1);
        }
        Self::attach_locked(&mut state, volume_id, node_id)
    }

    async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.detach += 1;

        let idx = state
            .find(volume_id)
            .ok_or_else(|| BackendError::VolumeNotFound(volume_id.to_string()))?;
        let stored = &mut state.volumes[idx];

        if stored.pending_attach_target().is_some() {
            // The attach never became visible; withdrawing it is the detach.
            stored.pending = None;
            return Ok(());
        }
        if stored.volume.attached_to.is_none() {
            return Ok(());
        }
        if matches!(
            stored.pending,
            Some(Pending {
                op: PendingOp::Detach,
                ..
            })
        ) {
            return Ok(());
        }

        state.schedule(idx, PendingOp::Detach);
        Ok(())
    }

    async fn resize_volume(&self, volume_id: &str, size_gb: u64) -> Result<()> {
        let mut state = self.state();
        state.calls.resize += 1;

        let idx = state
            .find(volume_id)
            .ok_or_else(|| BackendError::VolumeNotFound(volume_id.to_string()))?;
        let volume = &mut state.volumes[idx].volume;
        if size_gb < volume.size_gb || size_gb > MAX_VOLUME_SIZE_GB {
            return Err(BackendError::Rejected {
                status: 400,
                message: format!("cannot resize {}GB volume to {}GB", volume.size_gb, size_gb),
            });
        }

        volume.size_gb = size_gb;
        Ok(())
    }

    async fn get_instance(&self, node_id: &str) -> Result<Instance> {
        self.state()
            .instances
            .get(node_id)
            .cloned()
            .ok_or_else(|| BackendError::InstanceNotFound(node_id.to_string()))
    }

    async fn region_capacity(&self, _region: &str) -> Result<RegionCapacity> {
        let available_bytes = self
            .state()
            .capacity_bytes
            .unwrap_or(DEFAULT_REGION_CAPACITY_BYTES);
        Ok(RegionCapacity {
            available_bytes,
            minimum_volume_bytes: MIN_VOLUME_SIZE_GB as i64 * GIB,
            maximum_volume_bytes: MAX_VOLUME_SIZE_GB as i64 * GIB,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new()
            .with_instance("node-1", "ewr")
            .with_instance("node-2", "ewr")
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let backend = backend();
        let a = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        let b = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(backend.create_calls(), 2);
        assert!(a.mount_id.starts_with("ewr-"));
    }

    #[tokio::test]
    async fn test_create_settles_after_reads() {
        let backend = backend().with_settle_reads(2);
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        assert_eq!(volume.status, VolumeStatus::Creating);

        let first = backend.get_volume(&volume.id).await.unwrap();
        assert_eq!(first.status, VolumeStatus::Creating);
        let second = backend.get_volume(&volume.id).await.unwrap();
        assert_eq!(second.status, VolumeStatus::Creating);
        let third = backend.get_volume(&volume.id).await.unwrap();
        assert_eq!(third.status, VolumeStatus::Available);
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_size() {
        let backend = backend();
        let err = backend.create_volume("ewr", 5, "small").await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let backend = backend();
        assert!(backend.get_volume("missing").await.unwrap_err().is_not_found());
        assert!(backend.delete_volume("missing").await.unwrap_err().is_not_found());
        assert!(backend.detach_volume("missing").await.unwrap_err().is_not_found());
        assert!(backend.get_instance("node-9").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_attach_single_instance_only() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();

        backend.attach_volume(&volume.id, "node-1").await.unwrap();
        // Idempotent for the same instance
        backend.attach_volume(&volume.id, "node-1").await.unwrap();

        let err = backend.attach_volume(&volume.id, "node-2").await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyAttached { .. }));
        assert_eq!(backend.attachment(&volume.id).as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_attach_unknown_instance() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        let err = backend.attach_volume(&volume.id, "node-9").await.unwrap_err();
        assert!(matches!(err, BackendError::InstanceNotFound(_)));
    }

    #[tokio::test]
    async fn test_detach_unattached_is_success() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        backend.detach_volume(&volume.id).await.unwrap();
        assert!(backend.attachment(&volume.id).is_none());
    }

    #[tokio::test]
    async fn test_detach_withdraws_pending_attach() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        backend.set_never_settle(true);

        backend.attach_volume(&volume.id, "node-1").await.unwrap();
        assert!(backend.has_pending_operation(&volume.id));

        backend.detach_volume(&volume.id).await.unwrap();
        assert!(!backend.has_pending_operation(&volume.id));
        assert!(backend.attachment(&volume.id).is_none());
    }

    #[tokio::test]
    async fn test_reattach_cancels_pending_detach() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        backend.attach_volume(&volume.id, "node-1").await.unwrap();
        backend.set_never_settle(true);

        backend.detach_volume(&volume.id).await.unwrap();
        assert!(backend.has_pending_operation(&volume.id));

        backend.attach_volume(&volume.id, "node-1").await.unwrap();
        assert!(!backend.has_pending_operation(&volume.id));

        backend.set_never_settle(false);
        let settled = backend.get_volume(&volume.id).await.unwrap();
        assert_eq!(settled.attached_to.as_deref(), Some("node-1"));
        assert_eq!(backend.attachment(&volume.id).as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_delete_attached_volume_rejected() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        backend.attach_volume(&volume.id, "node-1").await.unwrap();

        let err = backend.delete_volume(&volume.id).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { .. }));
        assert_eq!(backend.volume_count(), 1);
    }

    #[tokio::test]
    async fn test_list_volumes_pagination() {
        let backend = backend();
        for i in 0..5 {
            backend
                .create_volume("ewr", 10, &format!("pvc-{}", i))
                .await
                .unwrap();
        }

        let first = backend.list_volumes(None, 2).await.unwrap();
        assert_eq!(first.volumes.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let last = backend.list_volumes(Some("4"), 2).await.unwrap();
        assert_eq!(last.volumes.len(), 1);
        assert!(last.next_cursor.is_none());

        let err = backend.list_volumes(Some("bogus"), 2).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidCursor(_)));
    }

    #[tokio::test]
    async fn test_injected_read_failures() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 10, "pvc-a").await.unwrap();
        backend.fail_next_reads(1);

        assert!(backend.get_volume(&volume.id).await.unwrap_err().is_transient());
        assert!(backend.get_volume(&volume.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_resize_never_shrinks() {
        let backend = backend();
        let volume = backend.create_volume("ewr", 20, "pvc-a").await.unwrap();

        assert!(backend.resize_volume(&volume.id, 10).await.is_err());
        backend.resize_volume(&volume.id, 30).await.unwrap();
        assert_eq!(backend.volume(&volume.id).unwrap().size_gb, 30);
    }
}
