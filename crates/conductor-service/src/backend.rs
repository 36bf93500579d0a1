//! Cloud backend seam
//!
//! Work that must reach the tenant of a cloud goes through [`CloudBackend`].
//! Keys are handed over as [`SshKeyRecord`]s so a remote worker can rebuild
//! them.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_structure::SshKeyRecord;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ServiceResult;

/// Operations run against a cloud tenant.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Install an SSH public key in the tenant of a membership.
    async fn push_ssh_public_key(&self, membership_id: Uuid, key: &SshKeyRecord) -> ServiceResult<()>;
}

/// Backend that only remembers what it was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloudBackend {
    pushed: Arc<Mutex<Vec<(Uuid, SshKeyRecord)>>>,
}

impl MemoryCloudBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys pushed so far, per membership.
    pub async fn pushed_keys(&self) -> Vec<(Uuid, SshKeyRecord)> {
        self.pushed.lock().await.clone()
    }
}

#[async_trait]
impl CloudBackend for MemoryCloudBackend {
    async fn push_ssh_public_key(&self, membership_id: Uuid, key: &SshKeyRecord) -> ServiceResult<()> {
        self.pushed.lock().await.push((membership_id, key.clone()));
        Ok(())
    }
}
