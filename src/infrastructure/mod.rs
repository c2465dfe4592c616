pub mod index_allocator;
pub mod js_executor;
pub mod progress_store;
pub mod rate_limiter;

pub use index_allocator::{BucketKey, IndexAllocator};
pub use js_executor::JsExecutor;
pub use progress_store::ProgressStore;
pub use rate_limiter::RateLimiter;
