//! Resource management

use crate::error::ExplorerError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Memory is accounted in units of this many bytes, so that a single request can describe more
/// than 4 GiB without overflowing the semaphore's `u32` permit count.
const MEMORY_PERMIT_BYTES: usize = 1024;

/// [crate::resource_manager::ResourceManager] bounds the resources used while materialising a
/// computation. Resource management is performed using a Tokio Semaphore for each type of
/// resource.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for object store connections.
    connections: Option<Semaphore>,

    /// Optional semaphore for memory (bytes).
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,

    /// Optional semaphore for CPU-bound tasks.
    tasks: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    ///
    /// # Arguments
    ///
    /// * `connection_limit`: Maximum number of concurrent object store requests
    /// * `memory_limit`: Maximum number of bytes held at once while materialising
    /// * `task_limit`: Maximum number of concurrent CPU-bound kernels
    pub fn new(
        connection_limit: Option<usize>,
        memory_limit: Option<usize>,
        task_limit: Option<usize>,
    ) -> Self {
        Self {
            connections: connection_limit.map(Semaphore::new),
            memory: memory_limit.map(|bytes| Semaphore::new(bytes.div_ceil(MEMORY_PERMIT_BYTES))),
            total_memory: memory_limit,
            tasks: task_limit.map(Semaphore::new),
        }
    }

    /// Returns a ResourceManager that imposes no limits.
    pub fn unlimited() -> Self {
        Self::new(None, None, None)
    }

    /// Acquire an object store connection resource.
    pub async fn connection(&self) -> Result<Option<SemaphorePermit>, ExplorerError> {
        optional_acquire(&self.connections, 1).await
    }

    /// Returns the memory limit in bytes, if any.
    pub fn memory_limit(&self) -> Option<usize> {
        self.total_memory
    }

    /// Acquire memory resource.
    ///
    /// Requests larger than the whole pool fail immediately rather than waiting forever.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, ExplorerError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(ExplorerError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        optional_acquire(&self.memory, bytes.div_ceil(MEMORY_PERMIT_BYTES)).await
    }

    /// Acquire a task resource.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, ExplorerError> {
        optional_acquire(&self.tasks, 1).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, ExplorerError> {
    let n = n.try_into()?;
    if let Some(sem) = sem {
        sem.acquire_many(n)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
