//! Background execution for the task indexing pipeline.
//!
//! Workers are OS threads that own their configuration and talk to the
//! caller through typed request/response messages. Two managers sit on top
//! of the generic [`WorkerPool`]:
//!
//! - [`ProjectDataWorkerManager`]: cache-first project data resolution with
//!   batching and synchronous fallback
//! - [`TaskWorkerManager`]: per-file task parsing off the calling task
//!
//! Outside state (file frontmatter, modification times, project config
//! files) comes in through [`ProjectConfigSource`].

pub mod cache;
pub mod error;
pub mod handler;
pub mod manager;
pub mod message;
pub mod pool;
pub mod source;
pub mod task_manager;
mod worker;

pub use cache::{CacheStats, ProjectDataCache};
pub use error::WorkerError;
pub use handler::{WorkerKind, WorkerState};
pub use manager::{ManagerOptions, MemoryStats, ProjectDataWorkerManager};
pub use message::{
  ProjectDataRequest, ProjectDataResult, RequestId, WorkerMessage, WorkerReply, WorkerRequest, WorkerResponse,
};
pub use pool::{DEFAULT_REQUEST_TIMEOUT, RequestIds, WorkerPool};
pub use source::{InMemoryProjectSource, ProjectConfigFile, ProjectConfigSource};
pub use task_manager::TaskWorkerManager;
