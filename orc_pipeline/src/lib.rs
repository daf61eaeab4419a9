//! ABOUTME: Pipeline runtime: per-application locking, freeze gating, and task scheduling
//! ABOUTME: Components C2 (Lock Service), C3 (Freeze Registry), C9 (Pipeline Runtime)

pub mod freeze;
pub mod lock;
pub mod runtime;

pub use freeze::{FreezeConfig, FreezeRegistry};
pub use lock::{InstanceId, Lock, LockConfig, LockGuard, LockService, LockStatus};
pub use runtime::{
    async_wait, Backoff, CancelToken, PipelineRuntime, RetryPolicy, RuntimeConfig, Task, TaskError,
    TaskResult,
};
