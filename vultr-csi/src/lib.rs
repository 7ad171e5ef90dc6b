//! Vultr Block Storage CSI Driver Library
//!
//! Kubernetes CSI driver that provisions Vultr Block Storage volumes and
//! attaches, formats and mounts them on Vultr instances.
//!
//! This library provides:
//! - CSI Identity, Controller, and Node service implementations
//! - The block storage backend abstraction with the Vultr API client
//! - Mount operations on Linux and an in-memory mounter for tests
//! - The gRPC front end serving all three services on one endpoint

/// CSI proto generated types
pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub mod backend;
pub mod config;
pub mod controller;
pub mod identity;
pub mod locks;
pub mod metadata;
pub mod metrics;
pub mod mounter;
pub mod node;
pub mod poll;
pub mod server;
pub mod types;

pub use backend::{InMemoryBackend, VolumeBackend, VultrClient};
pub use config::DriverConfig;
pub use controller::ControllerService;
pub use identity::IdentityService;
pub use mounter::{FakeMounter, LinuxMounter, Mounter};
pub use node::NodeService;
pub use server::{NonBlockingServer, ServerError};
