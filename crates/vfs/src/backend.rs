//! Synchronous access to the async storage client.
//!
//! Filesystem callbacks and fill loops run on plain threads. They drive the
//! client by blocking on the runtime handle the engine was built with.

use std::future::Future;
use std::sync::Arc;

use rusty_s3fs_storage::{StorageClient, StorageError};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Storage client plus the runtime that drives it.
#[derive(Clone)]
pub struct Backend {
    client: Arc<dyn StorageClient>,
    runtime: Handle,
}

impl Backend {
    /// Create a backend handle.
    ///
    /// # Arguments
    /// * `client` - Object store client
    /// * `runtime` - Handle of a runtime not driven by the calling threads
    pub fn new(client: Arc<dyn StorageClient>, runtime: Handle) -> Self {
        Self { client, runtime }
    }

    pub fn client(&self) -> &Arc<dyn StorageClient> {
        &self.client
    }

    /// Run `fut` to completion on the runtime.
    ///
    /// Must not be called from a thread that is itself driving the runtime.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Run `fut`, giving up with `Cancelled` as soon as `cancel` fires.
    pub fn block_on_cancellable<T, F>(
        &self,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        self.runtime.block_on(async {
            tokio::select! {
                _ = cancel.cancelled() => Err(StorageError::Cancelled),
                result = fut => result,
            }
        })
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
