//! Schema synchronization
//!
//! [`SynchronizationEngine`] moves through these states for every entity type:
//! Analyzing → Validating → (BackingUp) → Applying → Verifying → Completed,
//! with DryRun after validation and Failed reachable from anywhere.

pub mod engine;
pub mod events;
pub mod lock;
pub mod options;
pub mod result;

pub use engine::SynchronizationEngine;
pub use events::{EventDispatcher, TracingDispatcher};
pub use options::{SyncOptions, SyncStrategy};
pub use result::{SyncResult, SyncState, SyncStatus};
