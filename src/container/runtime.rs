use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::WardenError;
use crate::models::{NetworkPolicy, ResourceLimits};

/// Everything needed to start one isolated tool container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub limits: ResourceLimits,
    pub network: NetworkPolicy,
    /// Named volume mounted at `/scratch`. Without one the root filesystem is read-only.
    pub scratch_volume: Option<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn read_only_rootfs(&self) -> bool {
        self.scratch_volume.is_none()
    }
}

/// Seam between the executor and a container engine.
///
/// All errors are expected to be `WardenError::Infrastructure` so the
/// executor can retry launches.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start; returns the container id.
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, WardenError>;

    /// Combined stdout/stderr, following until the container exits.
    fn logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>, WardenError>>;

    /// Resolves with the exit code once the container stops.
    async fn wait(&self, id: &str) -> Result<i64, WardenError>;

    async fn kill(&self, id: &str) -> Result<(), WardenError>;

    async fn is_running(&self, id: &str) -> Result<bool, WardenError>;

    async fn remove(&self, id: &str) -> Result<(), WardenError>;
}
