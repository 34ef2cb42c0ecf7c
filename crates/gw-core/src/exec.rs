use std::sync::Arc;

use crate::Error;

/// Source of output and scratch buffers.
///
/// Kernels request zero-filled `f32` storage through this trait and surface
/// a refusal as [`Error::Allocation`] before writing anything.
pub trait Allocator: Send + Sync {
    fn alloc_zeroed(&self, len: usize) -> Result<Vec<f32>, Error>;
}

/// Heap allocation with fallible reservation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn alloc_zeroed(&self, len: usize) -> Result<Vec<f32>, Error> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| Error::Allocation { len })?;
        buf.resize(len, 0.0);
        Ok(buf)
    }
}

/// Heap allocation that refuses any single request above `max_len` elements.
#[derive(Debug, Clone, Copy)]
pub struct BoundedAllocator {
    pub max_len: usize,
}

impl BoundedAllocator {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Allocator for BoundedAllocator {
    fn alloc_zeroed(&self, len: usize) -> Result<Vec<f32>, Error> {
        if len > self.max_len {
            tracing::warn!(len, max_len = self.max_len, "allocation refused");
            return Err(Error::Allocation { len });
        }
        SystemAllocator.alloc_zeroed(len)
    }
}

/// Per-call execution options.
///
/// Nothing here is process-wide: a dedicated pool is only created by
/// [`ExecOptions::with_threads`] and lives as long as the options value.
#[derive(Clone)]
pub struct ExecOptions {
    pool: Option<Arc<rayon::ThreadPool>>,
    pub blob_allocator: Arc<dyn Allocator>,
    pub workspace_allocator: Arc<dyn Allocator>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            pool: None,
            blob_allocator: Arc::new(SystemAllocator),
            workspace_allocator: Arc::new(SystemAllocator),
        }
    }
}

impl core::fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("num_threads", &self.num_threads())
            .finish_non_exhaustive()
    }
}

impl ExecOptions {
    /// Builds options backed by a dedicated pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("geowarp-{i}"))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        Ok(Self {
            pool: Some(Arc::new(pool)),
            ..Self::default()
        })
    }

    pub fn with_blob_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.blob_allocator = allocator;
        self
    }

    pub fn with_workspace_allocator(mut self, allocator: Arc<dyn Allocator>) -> Self {
        self.workspace_allocator = allocator;
        self
    }

    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Runs `op` on this options' pool, or on the ambient rayon pool.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}
