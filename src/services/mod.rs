//! Business logic services.

pub mod cleanup;
pub mod durable_store;
pub mod media;
pub mod media_pipeline;
pub mod media_set;
pub mod orders;
pub mod os_number;
pub mod rate_limit;
pub mod storage;

pub use cleanup::{CleanupConfig, start_cleanup_task};
pub use durable_store::{DurableStore, FileDurableStore, MemoryDurableStore};
pub use media_pipeline::MediaPipeline;
pub use orders::{OrderService, OrderStore};
pub use os_number::{OrderNumberStore, OsNumberAllocator};
pub use rate_limit::RateLimiter;
pub use storage::{BlobStore, MemoryBlobStore, S3Storage};
