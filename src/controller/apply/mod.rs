//! # Apply
//!
//! Converges the cluster to a rendered resource set.
//!
//! - `diff.rs` - partitions rendered resources against the ledger
//! - `sync.rs` - writes the partition and produces the next ledger
//! - `store.rs` - cluster access behind the [`ObjectStore`] trait

pub mod diff;
pub mod store;
pub mod sync;

pub use diff::{diff, DiffResult};
pub use store::{KubeObjectStore, ObjectStore};
pub use sync::{sync, SyncOutcome};

/// Write behavior for a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub server_side_apply: bool,
    pub create_namespace: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            server_side_apply: true,
            create_namespace: true,
        }
    }
}
