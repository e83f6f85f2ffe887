//! Sandbox acquisition
//!
//! Only one sandbox may be live per process. The [`SandboxGate`] is created
//! once at the composition root and handed to whoever boots a sandbox; the
//! [`SandboxLease`] it returns holds the single permit until dropped.

use crate::ports::{ProcessHost, VirtualFs};
use crate::{PlaygroundError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info};
use uuid::Uuid;

/// Counting permit of exactly one for the sandbox
#[derive(Clone)]
pub struct SandboxGate {
    permits: Arc<Semaphore>,
}

impl Default for SandboxGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the sandbox to become free
    pub async fn acquire(&self) -> Result<SandboxLease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PlaygroundError::Defect("sandbox gate closed".to_string()))?;
        Ok(SandboxLease::new(permit))
    }

    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<SandboxLease> {
        tokio::time::timeout(timeout, self.acquire())
            .await
            .map_err(|_| {
                PlaygroundError::Timeout(format!("sandbox still busy after {:?}", timeout))
            })?
    }

    /// Fail immediately when another session holds the sandbox
    pub fn try_acquire(&self) -> Result<SandboxLease> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Ok(SandboxLease::new(permit)),
            Err(TryAcquireError::NoPermits) => Err(PlaygroundError::Sandbox(
                "another session is using the sandbox".to_string(),
            )),
            Err(TryAcquireError::Closed) => {
                Err(PlaygroundError::Defect("sandbox gate closed".to_string()))
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.permits.available_permits() > 0
    }
}

/// Proof of exclusive sandbox ownership; releases the permit on drop
#[derive(Debug)]
pub struct SandboxLease {
    id: Uuid,
    _permit: OwnedSemaphorePermit,
}

impl SandboxLease {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        let id = Uuid::new_v4();
        debug!("Sandbox lease {} acquired", id);
        Self {
            id,
            _permit: permit,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        debug!("Sandbox lease {} released", self.id);
    }
}

/// A booted sandbox: virtual filesystem plus process host
#[derive(Clone)]
pub struct Sandbox {
    fs: Arc<dyn VirtualFs>,
    processes: Arc<dyn ProcessHost>,
    lease: Arc<SandboxLease>,
}

impl Sandbox {
    /// Take the gate's permit and bind the sandbox services to it
    pub async fn boot(
        gate: &SandboxGate,
        fs: Arc<dyn VirtualFs>,
        processes: Arc<dyn ProcessHost>,
        timeout: Duration,
    ) -> Result<Self> {
        let lease = gate.acquire_timeout(timeout).await?;
        info!("Sandbox booted (lease {})", lease.id());
        Ok(Self {
            fs,
            processes,
            lease: Arc::new(lease),
        })
    }

    pub fn fs(&self) -> Arc<dyn VirtualFs> {
        self.fs.clone()
    }

    pub fn processes(&self) -> Arc<dyn ProcessHost> {
        self.processes.clone()
    }

    pub fn lease_id(&self) -> Uuid {
        self.lease.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test]
    async fn test_single_permit() {
        let gate = SandboxGate::new();
        let lease = gate.acquire().await.unwrap();
        assert!(!gate.is_available());
        assert!(matches!(
            gate.try_acquire(),
            Err(PlaygroundError::Sandbox(_))
        ));

        drop(lease);
        assert!(gate.is_available());
        assert!(gate.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout() {
        let gate = SandboxGate::new();
        let _lease = gate.acquire().await.unwrap();
        let err = gate
            .acquire_timeout(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaygroundError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_waiter_gets_permit_after_release() {
        let gate = SandboxGate::new();
        let lease = gate.acquire().await.unwrap();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|l| l.id()) })
        };
        tokio::task::yield_now().await;
        let first = lease.id();
        drop(lease);
        let second = waiter.await.unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_acquire_parks_until_release() {
        let gate = SandboxGate::new();
        let lease = gate.acquire().await.unwrap();

        let mut waiter = task::spawn(gate.acquire());
        assert_pending!(waiter.poll());

        drop(lease);
        assert!(waiter.is_woken());
        let second = assert_ready_ok!(waiter.poll());
        assert!(!gate.is_available());
        drop(second);
    }
}
