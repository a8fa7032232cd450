//! Bulk submission: partition planning, index claiming, and the
//! hierarchical spawner built on them.

pub mod hierarchical;
pub mod index_queue;
pub mod partition;

pub use hierarchical::{bulk_async_execute, bulk_post, bulk_sync_execute, bulk_then_execute};
pub use index_queue::IndexQueue;
pub use partition::{
    breadth_first, depth_first, partition, BulkLaunch, BulkMode, ContextPlan, Dispatch,
    Partition, PartitionDescriptor, MAX_BULK_ITEMS,
};
